//! Storage server for the sharded key-value store.
//!
//! A server owns one slice of the ring. It keeps its data in a [`KvStore`]
//! (storage behind a bounded cache), learns its slice from coordinator
//! directives through its [`NodeAgent`], hands off keys it no longer owns,
//! and serves clients over line-framed TCP.

pub mod agent;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod server;
pub mod storage;
pub mod store;

pub use agent::{Admission, NodeAgent};
pub use cache::{cache_for, BoundedCache, Cache, NoCache};
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use server::KvServer;
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use store::{KvStore, PutOutcome};
