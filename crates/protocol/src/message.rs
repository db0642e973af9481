//! Client request/reply messages.
//!
//! Wire form: `<STATUS><SEP>key<SEP>value<SEP>` followed by a line feed,
//! ASCII only. An empty value on `PUT` deletes the key.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Field separator (ASCII unit separator). Never valid inside a key or value.
pub const SEPARATOR: u8 = 0x1f;
/// Frame terminator.
pub const TERMINATOR: u8 = b'\n';
pub const MAX_KEY_LEN: usize = 20;
pub const MAX_VALUE_LEN: usize = 120 * 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StatusType {
    Get,
    Put,
    GetSuccess,
    GetError,
    PutSuccess,
    PutUpdate,
    PutError,
    DeleteSuccess,
    DeleteError,
    ServerNotResponsible,
    ServerStopped,
    Disconnect,
}

impl StatusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusType::Get => "GET",
            StatusType::Put => "PUT",
            StatusType::GetSuccess => "GET_SUCCESS",
            StatusType::GetError => "GET_ERROR",
            StatusType::PutSuccess => "PUT_SUCCESS",
            StatusType::PutUpdate => "PUT_UPDATE",
            StatusType::PutError => "PUT_ERROR",
            StatusType::DeleteSuccess => "DELETE_SUCCESS",
            StatusType::DeleteError => "DELETE_ERROR",
            StatusType::ServerNotResponsible => "SERVER_NOT_RESPONSIBLE",
            StatusType::ServerStopped => "SERVER_STOPPED",
            StatusType::Disconnect => "DISCONNECT",
        }
    }
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "GET" => StatusType::Get,
            "PUT" => StatusType::Put,
            "GET_SUCCESS" => StatusType::GetSuccess,
            "GET_ERROR" => StatusType::GetError,
            "PUT_SUCCESS" => StatusType::PutSuccess,
            "PUT_UPDATE" => StatusType::PutUpdate,
            "PUT_ERROR" => StatusType::PutError,
            "DELETE_SUCCESS" => StatusType::DeleteSuccess,
            "DELETE_ERROR" => StatusType::DeleteError,
            "SERVER_NOT_RESPONSIBLE" => StatusType::ServerNotResponsible,
            "SERVER_STOPPED" => StatusType::ServerStopped,
            "DISCONNECT" => StatusType::Disconnect,
            other => return Err(ProtocolError::UnknownStatus(other.to_string())),
        })
    }
}

/// One request or reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvMessage {
    pub status: StatusType,
    pub key: String,
    pub value: String,
}

impl KvMessage {
    pub fn new(status: StatusType, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            status,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn get(key: impl Into<String>) -> Self {
        Self::new(StatusType::Get, key, "")
    }

    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(StatusType::Put, key, value)
    }

    pub fn disconnect() -> Self {
        Self::new(StatusType::Disconnect, "", "")
    }

    /// Check a client request against key/value limits before it is sent.
    pub fn validate_request(&self) -> Result<()> {
        if self.status == StatusType::Disconnect {
            return Ok(());
        }
        validate_key(&self.key)?;
        validate_value(&self.value)
    }

    /// Frame including the trailing line feed.
    pub fn encode(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(self.status.as_str().len() + self.key.len() + self.value.len() + 4);
        buf.put_slice(self.status.as_str().as_bytes());
        buf.put_u8(SEPARATOR);
        buf.put_slice(self.key.as_bytes());
        buf.put_u8(SEPARATOR);
        buf.put_slice(self.value.as_bytes());
        buf.put_u8(SEPARATOR);
        buf.put_u8(TERMINATOR);
        buf.freeze()
    }

    /// Parse one frame; the trailing line feed is optional.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let frame = frame.strip_suffix(&[TERMINATOR]).unwrap_or(frame);
        let frame = frame.strip_suffix(b"\r").unwrap_or(frame);
        let text = std::str::from_utf8(frame)
            .map_err(|_| ProtocolError::Malformed("frame is not ASCII".into()))?;
        let mut fields = text.split(SEPARATOR as char);
        let status = fields
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProtocolError::Malformed("missing status".into()))?
            .parse()?;
        let key = fields.next().unwrap_or_default().to_string();
        let value = fields.next().unwrap_or_default().to_string();
        if !matches!(fields.collect::<Vec<_>>().as_slice(), [] | [""]) {
            return Err(ProtocolError::Malformed("too many fields".into()));
        }
        Ok(Self { status, key, value })
    }
}

impl fmt::Display for KvMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.status, self.key)
    }
}

fn check_chars(text: &str) -> Result<()> {
    match text.bytes().find(|b| !(0x20..0x7f).contains(b)) {
        Some(b) => Err(ProtocolError::InvalidCharacter(b)),
        None => Ok(()),
    }
}

/// Keys are 1..=20 printable ASCII bytes.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(ProtocolError::EmptyKey);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(ProtocolError::KeyTooLong(key.len()));
    }
    if key.contains(' ') {
        return Err(ProtocolError::InvalidCharacter(b' '));
    }
    check_chars(key)
}

/// Values are at most 120 KiB of printable ASCII; empty means delete.
pub fn validate_value(value: &str) -> Result<()> {
    if value.len() > MAX_VALUE_LEN {
        return Err(ProtocolError::ValueTooLong(value.len()));
    }
    check_chars(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        let msg = KvMessage::put("k1", "hello");
        assert_eq!(&msg.encode()[..], b"PUT\x1fk1\x1fhello\x1f\n");
    }

    #[test]
    fn test_decode_reply_with_empty_value() {
        let msg = KvMessage::decode(b"GET_ERROR\x1fmissing\x1f\x1f\n").unwrap();
        assert_eq!(msg, KvMessage::new(StatusType::GetError, "missing", ""));
    }

    #[test]
    fn test_decode_without_trailing_separator() {
        let msg = KvMessage::decode(b"GET\x1fk").unwrap();
        assert_eq!(msg, KvMessage::get("k"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            KvMessage::decode(b"FROB\x1fk\x1fv\x1f\n"),
            Err(ProtocolError::UnknownStatus(_))
        ));
        assert!(matches!(
            KvMessage::decode(b"\n"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            KvMessage::decode(b"PUT\x1fk\x1fv\x1fextra\x1f\n"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_key_limits() {
        assert!(validate_key("a").is_ok());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN)).is_ok());
        assert!(matches!(
            validate_key(&"k".repeat(MAX_KEY_LEN + 1)),
            Err(ProtocolError::KeyTooLong(21))
        ));
        assert!(matches!(validate_key(""), Err(ProtocolError::EmptyKey)));
        assert!(validate_key("a b").is_err());
        assert!(validate_key("caf\u{e9}").is_err());
    }

    #[test]
    fn test_value_limits() {
        assert!(validate_value("").is_ok());
        assert!(validate_value("with spaces is fine").is_ok());
        assert!(validate_value(&"v".repeat(MAX_VALUE_LEN)).is_ok());
        assert!(matches!(
            validate_value(&"v".repeat(MAX_VALUE_LEN + 1)),
            Err(ProtocolError::ValueTooLong(_))
        ));
        assert!(matches!(
            validate_value("line\nbreak"),
            Err(ProtocolError::InvalidCharacter(b'\n'))
        ));
        assert!(validate_value("sep\u{1f}").is_err());
    }

    #[test]
    fn test_disconnect_skips_validation() {
        assert!(KvMessage::disconnect().validate_request().is_ok());
        assert!(KvMessage::get("").validate_request().is_err());
    }
}
