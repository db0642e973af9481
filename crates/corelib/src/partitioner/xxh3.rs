//! XXH3-128 partitioner implementation.

use xxhash_rust::xxh3::xxh3_128;

use crate::partitioner::traits::Partitioner;
use crate::token::{RingPosition, Token};

/// Maps bytes onto the 128-bit ring with XXH3-128 (unseeded, so stable).
#[derive(Clone, Copy, Debug, Default)]
pub struct Xxh3Partitioner;

impl Xxh3Partitioner {
    /// Ring position of a server address, hashed as `"host:port"`.
    pub fn position_of_address(&self, host: &str, port: u16) -> RingPosition {
        self.partition(format!("{}:{}", host, port).as_bytes())
    }

    /// Ring position of a client key.
    pub fn position_of_key(&self, key: &str) -> RingPosition {
        self.partition(key.as_bytes())
    }
}

impl Partitioner for Xxh3Partitioner {
    type TokenType = RingPosition;

    fn partition(&self, key: &[u8]) -> Self::TokenType {
        RingPosition(xxh3_128(key))
    }

    fn min_token(&self) -> Self::TokenType {
        RingPosition::zero()
    }

    fn max_token(&self) -> Self::TokenType {
        <RingPosition as Token>::max()
    }

    fn name(&self) -> &'static str {
        "Xxh3Partitioner"
    }
}

/// Ring position of `"host:port"` with the default partitioner.
pub fn hash_of(host: &str, port: u16) -> RingPosition {
    Xxh3Partitioner.position_of_address(host, port)
}

/// Ring position of a client key with the default partitioner.
pub fn hash_key(key: &str) -> RingPosition {
    Xxh3Partitioner.position_of_key(key)
}
