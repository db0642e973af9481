//! Hash ring data structure.
//!
//! Nodes are held in a `BTreeMap` keyed by ring position; neighbours are
//! found with range queries instead of stored back-references, so a node's
//! `prev_id`/`next_id` are always recomputed from the map on every change.
//!
//! Ownership convention: a node at `id` owns `(predecessor.id, id]`.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use crate::error::{Error, Result};
use crate::metadata::MetadataTable;
use crate::node::Node;
use crate::partitioner::{Partitioner, Xxh3Partitioner};
use crate::ring::range::KeyRange;
use crate::token::RingPosition;

/// How a joining node's ring position is chosen.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum PlacementPolicy {
    /// Keep the position the node was built with, normally `hash("host:port")`.
    #[default]
    Hashed,
    /// First node keeps its hashed position; every later node is moved to
    /// the midpoint of the widest range, so range sizes stay within 2x.
    EvenSplit,
}

/// Result of removing a node.
#[derive(Clone, Debug)]
pub struct Removal {
    /// The removed node, carrying [`KeyRange::Empty`].
    pub node: Node,
    /// Ownership as it was just before the removal.
    pub previous: MetadataTable,
}

/// Consistent hash ring keyed by 128-bit position.
#[derive(Clone, Debug, Default)]
pub struct HashRing {
    nodes: BTreeMap<RingPosition, Node>,
    partitioner: Xxh3Partitioner,
    policy: PlacementPolicy,
}

impl HashRing {
    /// Create an empty ring with hashed placement.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: PlacementPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> PlacementPolicy {
        self.policy
    }

    /// Insert `node`, taking over part of its successor's range.
    ///
    /// Every node owns `(predecessor, own position]`: the keys hashing up to
    /// and including its position, counted clockwise from the node before
    /// it. The new node therefore claims `(predecessor, node.id]`, which its
    /// successor held until now.
    ///
    /// Returns the position the node was placed at, which differs from
    /// `node.id` only under [`PlacementPolicy::EvenSplit`].
    pub fn place(&mut self, mut node: Node) -> Result<RingPosition> {
        if self.policy == PlacementPolicy::EvenSplit {
            if let Some(mid) = self.widest_range().and_then(|r| r.midpoint()) {
                node.id = mid;
            }
        }
        if let Some(holder) = self.nodes.get(&node.id) {
            return Err(Error::DuplicatePosition {
                position: node.id,
                holder: holder.address(),
            });
        }
        if let Some(existing) = self.find_by_address(&node.address()) {
            return Err(Error::InvalidNode(format!(
                "{} is already placed at {}",
                existing.address(),
                existing.id
            )));
        }

        let id = node.id;
        match (self.predecessor_of(id), self.successor_of(id)) {
            (Some(pred), Some(succ)) => {
                node.prev_id = pred;
                node.next_id = succ;
                node.range = KeyRange::span(pred, id);
                if let Some(s) = self.nodes.get_mut(&succ) {
                    s.prev_id = id;
                    s.range = KeyRange::span(id, succ);
                }
                if let Some(p) = self.nodes.get_mut(&pred) {
                    p.next_id = id;
                }
            }
            _ => {
                node.prev_id = id;
                node.next_id = id;
                node.range = KeyRange::full(id);
            }
        }
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Remove the node at `id`; its successor absorbs its range.
    pub fn remove(&mut self, id: RingPosition) -> Result<Removal> {
        let previous = self.snapshot();
        let mut node = self.nodes.remove(&id).ok_or(Error::UnknownNode(id))?;

        if let (Some(pred), Some(succ)) = (self.predecessor_of(id), self.successor_of(id)) {
            // With one survivor pred == succ and the span below is the full circle.
            if let Some(s) = self.nodes.get_mut(&succ) {
                s.prev_id = pred;
                s.range = KeyRange::span(pred, succ);
            }
            if let Some(p) = self.nodes.get_mut(&pred) {
                p.next_id = succ;
            }
        }

        node.range = KeyRange::Empty;
        Ok(Removal { node, previous })
    }

    /// The unique node whose range contains `position`.
    pub fn lookup(&self, position: RingPosition) -> Option<&Node> {
        self.nodes
            .range(position..)
            .next()
            .or_else(|| self.nodes.iter().next())
            .map(|(_, node)| node)
    }

    /// The node responsible for a client key.
    pub fn lookup_key(&self, key: &str) -> Option<&Node> {
        self.lookup(self.partitioner.position_of_key(key))
    }

    /// Externally shippable ownership table.
    pub fn snapshot(&self) -> MetadataTable {
        MetadataTable::from_nodes(self.nodes.values())
    }

    pub fn get(&self, id: RingPosition) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: RingPosition) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Look a node up by its `host:port`.
    pub fn find_by_address(&self, address: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.address() == address)
    }

    /// Look a node up by its pool machine name.
    pub fn find_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.name == name)
    }

    /// Nodes in ring order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn positions(&self) -> Vec<RingPosition> {
        self.nodes.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn partitioner_name(&self) -> &'static str {
        self.partitioner.name()
    }

    fn predecessor_of(&self, id: RingPosition) -> Option<RingPosition> {
        self.nodes
            .range(..id)
            .next_back()
            .or_else(|| self.nodes.range((Excluded(id), Unbounded)).next_back())
            .map(|(pos, _)| *pos)
    }

    fn successor_of(&self, id: RingPosition) -> Option<RingPosition> {
        self.nodes
            .range((Excluded(id), Unbounded))
            .next()
            .or_else(|| self.nodes.range(..id).next())
            .map(|(pos, _)| *pos)
    }

    /// Widest range; ties go to the range ending at the lowest position.
    fn widest_range(&self) -> Option<KeyRange> {
        let mut widest: Option<KeyRange> = None;
        for node in self.nodes.values() {
            if widest.map_or(true, |w| node.range.width() > w.width()) {
                widest = Some(node.range);
            }
        }
        widest
    }
}
