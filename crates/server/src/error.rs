//! Server errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("storage failure: {0}")]
    Storage(String),
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),
    #[error(transparent)]
    Coordination(#[from] coordination::CoordinationError),
    #[error(transparent)]
    Metadata(#[from] corelib::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
