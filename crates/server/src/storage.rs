//! Durable key-value storage behind each server.
//!
//! Implementations must be safe to call from many connection tasks at once.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{Result, ServerError};

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite; returns whether the key already existed.
    fn put(&self, key: &str, value: &str) -> Result<bool>;

    /// Returns whether the key existed.
    fn delete(&self, key: &str) -> Result<bool>;

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Snapshot of every stored pair.
    fn entries(&self) -> Result<Vec<(String, String)>>;
}

/// Volatile storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    map: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.get(key).map(|v| v.value().clone()))
    }

    fn put(&self, key: &str, value: &str) -> Result<bool> {
        Ok(self.map.insert(key.to_string(), value.to_string()).is_some())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.map.remove(key).is_some())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.map.contains_key(key))
    }

    fn entries(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .map
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }
}

/// Storage persisted as a JSON object, rewritten atomically on every change.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    map: RwLock<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open (or start) `<dir>/<name>.json`.
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.json"));
        let map = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| ServerError::Storage(format!("{}: {e}", path.display())))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            map: RwLock::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let text = serde_json::to_string(map).map_err(|e| ServerError::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<bool> {
        let mut map = self.map.write();
        let existed = map.insert(key.to_string(), value.to_string()).is_some();
        self.persist(&map)?;
        Ok(existed)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut map = self.map.write();
        let existed = map.remove(key).is_some();
        if existed {
            self.persist(&map)?;
        }
        Ok(existed)
    }

    fn entries(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
