//! Core token trait definitions.
//!
//! The `Token` trait is minimal so ring, partitioners and ranges work on any
//! circular, totally ordered space.

use std::fmt::Debug;
use std::hash::Hash;

/// Errors that can occur when parsing tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Invalid textual form for this token type
    #[error("invalid token text: {0}")]
    InvalidText(String),
}

/// Minimal token trait for the hash ring.
///
/// Tokens are immutable, comparable positions. Implementations must be
/// thread-safe and cheap to compare/hash.
pub trait Token: Clone + Ord + Hash + Send + Sync + Debug + 'static {
    /// Minimum token value (start of ring).
    fn zero() -> Self;
    /// Maximum token value (end of ring).
    fn max() -> Self;
    /// Clockwise distance from `self` to `other` on the ring.
    fn distance_to(&self, other: &Self) -> Self;
    /// The token `by` steps clockwise past `self`, wrapping at the maximum.
    fn advance(&self, by: &Self) -> Self;
}
