//! Protocol errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("key must not be empty")]
    EmptyKey,
    #[error("key is {0} bytes; the limit is {limit}", limit = crate::MAX_KEY_LEN)]
    KeyTooLong(usize),
    #[error("value is {0} bytes; the limit is {limit}", limit = crate::MAX_VALUE_LEN)]
    ValueTooLong(usize),
    #[error("byte {0:#04x} cannot be sent")]
    InvalidCharacter(u8),
    #[error("unknown status {0:?}")]
    UnknownStatus(String),
    #[error("unknown directive {0:?}")]
    UnknownDirective(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("frame exceeds {0} bytes")]
    FrameTooLong(usize),
    #[error("bad metadata: {0}")]
    Metadata(#[from] corelib::Error),
    #[error("bad key-value payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
