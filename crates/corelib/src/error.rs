//! Error types for the core library.

use crate::token::RingPosition;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Invalid token value
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    /// Invalid node configuration
    #[error("Invalid node: {0}")]
    InvalidNode(String),
    /// Two servers hash (or were split) onto the same ring position
    #[error("Ring position {position} is already held by {holder}")]
    DuplicatePosition {
        position: RingPosition,
        holder: String,
    },
    /// No node sits at the given position
    #[error("No node at ring position {0}")]
    UnknownNode(RingPosition),
    /// Metadata table could not be parsed or is inconsistent
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
}

impl From<crate::token::TokenError> for Error {
    fn from(err: crate::token::TokenError) -> Self {
        Error::InvalidToken(err.to_string())
    }
}
