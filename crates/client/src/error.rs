//! Client errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connecting to {0} timed out")]
    ConnectTimeout(String),
    #[error("not connected")]
    NotConnected,
    #[error("server closed the connection")]
    Closed,
    #[error("{address} is not responsible for {key:?} even after a metadata refresh")]
    Redirect { key: String, address: String },
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),
    #[error(transparent)]
    Metadata(#[from] corelib::Error),
}

impl ClientError {
    /// The server behind the current connection can no longer be reached.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            ClientError::Closed | ClientError::NotConnected | ClientError::Protocol(protocol::ProtocolError::Io(_))
        )
    }
}
