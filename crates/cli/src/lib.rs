//! Operator shell for the sharded key-value store.
//!
//! Provides:
//! - Command-line configuration of the coordinator and its machine pool
//! - Shell commands for cluster membership (`addnode`, `removenode`, ...)
//! - Crash simulation (`kill`) and quick `put`/`get` checks

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult, Shell};
pub use config::{CliConfig, Placement};
