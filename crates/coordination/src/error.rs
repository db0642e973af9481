//! Coordination service errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinationError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinationError {
    #[error("no node at {0}")]
    NoNode(String),
    #[error("node {0} already exists")]
    NodeExists(String),
    #[error("node {0} has children")]
    NotEmpty(String),
    #[error("ephemeral node {0} cannot have children")]
    NoChildrenForEphemerals(String),
    #[error("invalid path {0:?}")]
    InvalidPath(String),
    #[error("session expired")]
    SessionExpired,
    #[error("version of {path} is {actual}, expected {expected}")]
    BadVersion {
        path: String,
        expected: u64,
        actual: u64,
    },
}
