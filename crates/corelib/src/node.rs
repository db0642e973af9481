//! Node abstractions for the consistent hash ring.
//!
//! A `Node` is the per-server descriptor the coordinator keeps in its ring:
//! identity, address, cache configuration, ring neighbours, owned range and
//! lifecycle status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::partitioner::xxh3::hash_of;
use crate::ring::KeyRange;
use crate::token::RingPosition;

/// Eviction policy a server runs its in-memory cache with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStrategy {
    /// No caching; every read goes to storage.
    #[default]
    None,
    Fifo,
    Lru,
    Lfu,
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheStrategy::None => "NONE",
            CacheStrategy::Fifo => "FIFO",
            CacheStrategy::Lru => "LRU",
            CacheStrategy::Lfu => "LFU",
        };
        f.write_str(name)
    }
}

impl FromStr for CacheStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(CacheStrategy::None),
            "FIFO" => Ok(CacheStrategy::Fifo),
            "LRU" => Ok(CacheStrategy::Lru),
            "LFU" => Ok(CacheStrategy::Lfu),
            other => Err(Error::InvalidNode(format!("unknown cache strategy {other}"))),
        }
    }
}

/// Lifecycle of a candidate machine as seen by the coordinator.
///
/// `Offline -> Idle -> Online`, back to `Idle` on stop and `Offline` on a
/// planned removal. `Failed` is terminal for the session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    #[default]
    Offline,
    Idle,
    Online,
    Failed,
}

impl NodeStatus {
    /// In the ring with a live process (idle or serving).
    pub fn is_active(&self) -> bool {
        matches!(self, NodeStatus::Idle | NodeStatus::Online)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Offline => "OFFLINE",
            NodeStatus::Idle => "IDLE",
            NodeStatus::Online => "ONLINE",
            NodeStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Server participating in the ring.
///
/// Keep this struct cheap to clone; connections and storage live with the
/// server process, not here. `prev_id`, `next_id` and `range` are maintained
/// by [`HashRing`](crate::ring::HashRing) and are only meaningful while the
/// node is placed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: RingPosition,
    /// Machine name from the pool, e.g. `server3`.
    pub name: String,
    pub host: String,
    pub port: u16,
    pub cache_strategy: CacheStrategy,
    pub cache_size: usize,
    pub prev_id: RingPosition,
    pub next_id: RingPosition,
    pub range: KeyRange,
    pub status: NodeStatus,
}

impl Node {
    /// Construct an unplaced node whose id is the hash of its address.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        cache_strategy: CacheStrategy,
        cache_size: usize,
    ) -> Self {
        let host = host.into();
        let id = hash_of(&host, port);
        Self::with_id(id, name, host, port, cache_strategy, cache_size)
    }

    /// Construct an unplaced node at an explicit ring position.
    pub fn with_id(
        id: RingPosition,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        cache_strategy: CacheStrategy,
        cache_size: usize,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            host: host.into(),
            port,
            cache_strategy,
            cache_size,
            prev_id: id,
            next_id: id,
            range: KeyRange::Empty,
            status: NodeStatus::Offline,
        }
    }

    /// `host:port`, the key used in metadata tables and coordination paths.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `name:host:port`, the key used in server status reports.
    pub fn label(&self) -> String {
        format!("{}:{}:{}", self.name, self.host, self.port)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} [{}]", self.label(), self.id, self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_strategy_parse() {
        assert_eq!("lru".parse::<CacheStrategy>().unwrap(), CacheStrategy::Lru);
        assert_eq!("FIFO".parse::<CacheStrategy>().unwrap(), CacheStrategy::Fifo);
        assert!("random".parse::<CacheStrategy>().is_err());
        assert_eq!(CacheStrategy::Lfu.to_string(), "LFU");
    }

    #[test]
    fn test_node_identity() {
        let node = Node::new("server1", "127.0.0.1", 50000, CacheStrategy::Fifo, 10);
        assert_eq!(node.id, hash_of("127.0.0.1", 50000));
        assert_eq!(node.address(), "127.0.0.1:50000");
        assert_eq!(node.label(), "server1:127.0.0.1:50000");
        assert_eq!(node.status, NodeStatus::Offline);
        assert_eq!(node.range, KeyRange::Empty);
    }

    #[test]
    fn test_status_activity() {
        assert!(NodeStatus::Idle.is_active());
        assert!(NodeStatus::Online.is_active());
        assert!(!NodeStatus::Offline.is_active());
        assert!(!NodeStatus::Failed.is_active());
    }
}
