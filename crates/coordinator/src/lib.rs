//! Cluster coordinator for the sharded key-value store.
//!
//! The coordinator owns the hash ring. It allocates servers from a
//! [`MachinePool`], starts them through a [`Launcher`], pushes ownership to
//! them as directives through the coordination service, and replaces any
//! server whose presence marker disappears.

pub mod await_group;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod launcher;
pub mod pool;

pub use await_group::{AwaitGroup, Confirmer};
pub use coordinator::{Coordinator, CoordinatorConfig, ServerStatusInfo};
pub use error::{CoordinatorError, Result};
pub use launcher::{Launcher, LocalLauncher};
pub use pool::{Machine, MachinePool};
