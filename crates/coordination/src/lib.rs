//! Coordination service abstraction.
//!
//! Membership state is relayed through a service offering a filesystem-like
//! hierarchy of named nodes with byte payloads, one-shot watches and
//! session-bound (ephemeral) nodes. The trait mirrors what such services
//! expose; [`MemoryCoordination`] implements it in-process.

pub mod error;
pub mod memory;
pub mod paths;
pub mod service;

pub use error::{CoordinationError, Result};
pub use memory::{MemoryCoordination, MemorySession};
pub use paths::ClusterPaths;
pub use service::{ensure_path, CoordinationService, CreateMode, EventKind, SessionId, Version, Watch, WatchEvent};
