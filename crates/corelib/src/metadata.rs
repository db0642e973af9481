//! Ownership snapshots shipped to servers and clients.
//!
//! A [`MetadataTable`] is an immutable copy of the ring that needs nothing
//! from ring internals: given a key it names the owning `host:port`. A new
//! table replaces the old one on every membership change.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::node::{CacheStrategy, Node};
use crate::partitioner::xxh3::hash_key;
use crate::ring::KeyRange;
use crate::token::RingPosition;

/// One server's row in the table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    pub host: String,
    pub port: u16,
    pub range: KeyRange,
    pub cache_strategy: CacheStrategy,
    pub cache_size: usize,
}

impl MetadataEntry {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&Node> for MetadataEntry {
    fn from(node: &Node) -> Self {
        Self {
            host: node.host.clone(),
            port: node.port,
            range: node.range,
            cache_strategy: node.cache_strategy,
            cache_size: node.cache_size,
        }
    }
}

/// Mapping from `host:port` to [`MetadataEntry`], ordered by address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataTable {
    entries: BTreeMap<String, MetadataEntry>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        Self::from_entries(nodes.into_iter().map(MetadataEntry::from))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = MetadataEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.address(), e)).collect(),
        }
    }

    /// Copy of this table with `entry` added or replaced.
    pub fn with_entry(&self, entry: MetadataEntry) -> Self {
        let mut entries = self.entries.clone();
        entries.insert(entry.address(), entry);
        Self { entries }
    }

    pub fn get(&self, address: &str) -> Option<&MetadataEntry> {
        self.entries.get(address)
    }

    /// Range owned by `address`; empty when the table does not list it.
    pub fn range_of(&self, address: &str) -> KeyRange {
        self.entries
            .get(address)
            .map(|e| e.range)
            .unwrap_or(KeyRange::Empty)
    }

    /// The entry whose range contains `position`.
    pub fn owner_of(&self, position: RingPosition) -> Option<&MetadataEntry> {
        self.entries.values().find(|e| e.range.contains(position))
    }

    pub fn owner_of_key(&self, key: &str) -> Option<&MetadataEntry> {
        self.owner_of(hash_key(key))
    }

    pub fn entries(&self) -> impl Iterator<Item = &MetadataEntry> {
        self.entries.values()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidMetadata(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::InvalidMetadata(e.to_string()))
    }
}
