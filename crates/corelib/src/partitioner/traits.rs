//! Core partitioner trait definitions.

use crate::token::Token;

/// A partitioner converts keys into tokens for placement on the hash ring.
///
/// Partitioners are stateless and thread-safe, allowing concurrent
/// token generation without synchronization overhead. They must be
/// content-derived: the same bytes map to the same token in every process
/// and across restarts.
pub trait Partitioner: Send + Sync + 'static {
    /// The token type produced by this partitioner.
    type TokenType: Token;

    /// Converts a key into a token.
    fn partition(&self, key: &[u8]) -> Self::TokenType;

    /// Returns the minimum token value for this partitioner.
    fn min_token(&self) -> Self::TokenType;

    /// Returns the maximum token value for this partitioner.
    fn max_token(&self) -> Self::TokenType;

    /// Returns the name of this partitioner.
    fn name(&self) -> &'static str;
}
