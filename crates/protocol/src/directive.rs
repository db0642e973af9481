//! Coordinator-to-server control messages.
//!
//! Wire form: `<TYPE><SEP><metadata><SEP><key-values><SEP><sender>` where
//! metadata and key-values are JSON objects keyed in order (by `host:port`
//! and by key respectively) and any absent part is the empty string. The
//! sender field may be omitted entirely.
//!
//! A directive with no sender comes from the coordinator. A server
//! acknowledges it by writing back the same kind with itself as sender.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use corelib::MetadataTable;

use crate::error::{ProtocolError, Result};
use crate::message::SEPARATOR;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Init,
    Start,
    Stop,
    Shutdown,
    Update,
    TransferData,
    TransferDataComplete,
}

impl DirectiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectiveKind::Init => "INIT",
            DirectiveKind::Start => "START",
            DirectiveKind::Stop => "STOP",
            DirectiveKind::Shutdown => "SHUTDOWN",
            DirectiveKind::Update => "UPDATE",
            DirectiveKind::TransferData => "TRANSFER_DATA",
            DirectiveKind::TransferDataComplete => "TRANSFER_DATA_COMPLETE",
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirectiveKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "INIT" => DirectiveKind::Init,
            "START" => DirectiveKind::Start,
            "STOP" => DirectiveKind::Stop,
            "SHUTDOWN" => DirectiveKind::Shutdown,
            "UPDATE" => DirectiveKind::Update,
            "TRANSFER_DATA" => DirectiveKind::TransferData,
            "TRANSFER_DATA_COMPLETE" => DirectiveKind::TransferDataComplete,
            other => return Err(ProtocolError::UnknownDirective(other.to_string())),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectiveMessage {
    pub kind: DirectiveKind,
    pub metadata: Option<MetadataTable>,
    pub key_values: Option<BTreeMap<String, String>>,
    pub sender: Option<String>,
}

impl DirectiveMessage {
    pub fn new(kind: DirectiveKind) -> Self {
        Self {
            kind,
            metadata: None,
            key_values: None,
            sender: None,
        }
    }

    pub fn init(metadata: MetadataTable) -> Self {
        Self {
            metadata: Some(metadata),
            ..Self::new(DirectiveKind::Init)
        }
    }

    pub fn update(metadata: MetadataTable) -> Self {
        Self {
            metadata: Some(metadata),
            ..Self::new(DirectiveKind::Update)
        }
    }

    pub fn transfer(key_values: BTreeMap<String, String>, sender: impl Into<String>) -> Self {
        Self {
            key_values: Some(key_values),
            sender: Some(sender.into()),
            ..Self::new(DirectiveKind::TransferData)
        }
    }

    pub fn transfer_complete(sender: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            ..Self::new(DirectiveKind::TransferDataComplete)
        }
    }

    /// Payload-free echo of this directive, marking it applied by `sender`.
    pub fn acknowledgement(&self, sender: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            ..Self::new(self.kind)
        }
    }

    pub fn is_from_coordinator(&self) -> bool {
        self.sender.is_none()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let metadata = match &self.metadata {
            Some(table) => table.to_json()?,
            None => String::new(),
        };
        let key_values = match &self.key_values {
            Some(kvs) => serde_json::to_string(kvs)?,
            None => String::new(),
        };
        let mut out = Vec::with_capacity(metadata.len() + key_values.len() + 32);
        out.extend_from_slice(self.kind.as_str().as_bytes());
        out.push(SEPARATOR);
        out.extend_from_slice(metadata.as_bytes());
        out.push(SEPARATOR);
        out.extend_from_slice(key_values.as_bytes());
        out.push(SEPARATOR);
        if let Some(sender) = &self.sender {
            out.extend_from_slice(sender.as_bytes());
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ProtocolError::Malformed("directive is not UTF-8".into()))?;
        let fields: Vec<&str> = text.split(SEPARATOR as char).collect();
        if fields.len() < 3 || fields.len() > 4 {
            return Err(ProtocolError::Malformed(format!(
                "directive has {} fields",
                fields.len()
            )));
        }
        let kind = fields[0].parse()?;
        let metadata = match fields[1] {
            "" => None,
            json => Some(MetadataTable::from_json(json)?),
        };
        let key_values = match fields[2] {
            "" => None,
            json => Some(serde_json::from_str(json)?),
        };
        let sender = fields
            .get(3)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        Ok(Self {
            kind,
            metadata,
            key_values,
            sender,
        })
    }
}

impl fmt::Display for DirectiveMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sender {
            Some(sender) => write!(f, "{} from {}", self.kind, sender),
            None => write!(f, "{}", self.kind),
        }
    }
}
