//! Consistent hash ring implementation.
//!
//! The ring manages node positions and ownership ranges and answers which
//! node is responsible for a key.

pub mod range;
pub mod ring;

pub use range::KeyRange;
pub use ring::{HashRing, PlacementPolicy, Removal};
