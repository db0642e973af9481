//! Core library for the sharded key-value store.
//!
//! This crate provides the ownership abstractions shared by every process:
//! - Ring positions (128-bit tokens) and the partitioner producing them
//! - Node records and their lifecycle status
//! - The consistent hash ring and its ownership ranges
//! - Metadata tables, the shippable snapshot of the ring

pub mod error;
pub mod metadata;
pub mod node;
pub mod partitioner;
pub mod ring;
pub mod token;

pub use error::{Error, Result};
pub use metadata::{MetadataEntry, MetadataTable};
pub use node::{CacheStrategy, Node, NodeStatus};
pub use partitioner::xxh3::{hash_key, hash_of};
pub use partitioner::Partitioner;
pub use ring::{HashRing, KeyRange, PlacementPolicy, Removal};
pub use token::{RingPosition, Token};
