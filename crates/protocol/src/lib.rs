//! Wire protocol for the sharded key-value store.
//!
//! This crate provides the message forms and framing for:
//! - Client requests and replies (`KvMessage`)
//! - Coordinator directives and server-to-server data handoff
//!   (`DirectiveMessage`)
//! - Line-delimited framing over any tokio byte stream

pub mod codec;
pub mod directive;
pub mod error;
pub mod message;

pub use codec::{FrameReader, FrameWriter};
pub use directive::{DirectiveKind, DirectiveMessage};
pub use error::{ProtocolError, Result};
pub use message::{KvMessage, StatusType, MAX_KEY_LEN, MAX_VALUE_LEN, SEPARATOR};
