//! Partitioner abstraction for consistent hashing.
//!
//! Partitioners are responsible for converting keys and server addresses
//! into tokens that can be placed on the hash ring.

pub mod traits;
pub mod xxh3;

pub use traits::Partitioner;
pub use xxh3::Xxh3Partitioner;
