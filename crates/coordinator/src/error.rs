//! Coordinator errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("{requested} servers requested but only {available} machines are offline")]
    NotEnoughMachines { requested: usize, available: usize },
    #[error("unknown server {0}")]
    UnknownServer(String),
    #[error("machine pool line {line}: {reason}")]
    Pool { line: usize, reason: String },
    #[error("could not launch {name}: {reason}")]
    Launch { name: String, reason: String },
    #[error("coordinator task has stopped")]
    Stopped,
    #[error(transparent)]
    Ring(#[from] corelib::Error),
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),
    #[error(transparent)]
    Coordination(#[from] coordination::CoordinationError),
    #[error(transparent)]
    Server(#[from] server::ServerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
