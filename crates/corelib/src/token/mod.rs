//! Token abstraction module for consistent hashing.
//!
//! Tokens represent positions on the hash ring and must be comparable,
//! hashable, and thread-safe.

pub mod position;
pub mod traits;

pub use position::RingPosition;
pub use traits::{Token, TokenError};
