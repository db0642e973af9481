//! Client library for the sharded key-value store.

pub mod connection;
pub mod error;
pub mod router;

pub use connection::Connection;
pub use error::{ClientError, Result};
pub use router::{ClientRouter, DEFAULT_CONNECT_TIMEOUT};
