//! Cache plus storage, as seen by request handlers and data handoff.

use std::hash::{BuildHasher, Hash, Hasher};
use std::collections::hash_map::RandomState;

use parking_lot::RwLock;

use crate::cache::{cache_for, Cache};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::storage::{FileStorage, MemoryStorage, Storage};

const LOCK_STRIPES: usize = 64;

/// What a `PUT` did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Updated,
}

/// Reads and writes of one key exclude each other; distinct keys on
/// different stripes proceed in parallel.
pub struct KvStore {
    storage: Box<dyn Storage>,
    cache: Box<dyn Cache>,
    stripes: Vec<RwLock<()>>,
    hasher: RandomState,
}

impl KvStore {
    pub fn new(storage: Box<dyn Storage>, cache: Box<dyn Cache>) -> Self {
        Self {
            storage,
            cache,
            stripes: (0..LOCK_STRIPES).map(|_| RwLock::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    /// Storage and cache as the server config asks for.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let storage: Box<dyn Storage> = match &config.data_dir {
            Some(dir) => Box::new(FileStorage::open(dir, &config.name)?),
            None => Box::new(MemoryStorage::new()),
        };
        Ok(Self::new(
            storage,
            cache_for(config.cache_strategy, config.cache_size),
        ))
    }

    fn stripe(&self, key: &str) -> &RwLock<()> {
        let mut h = self.hasher.build_hasher();
        key.hash(&mut h);
        &self.stripes[h.finish() as usize % LOCK_STRIPES]
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.stripe(key).read();
        if let Some(value) = self.cache.read(key) {
            return Ok(Some(value));
        }
        let value = self.storage.get(key)?;
        if let Some(v) = &value {
            self.cache.write(key, v);
        }
        Ok(value)
    }

    pub fn put(&self, key: &str, value: &str) -> Result<PutOutcome> {
        let _guard = self.stripe(key).write();
        let existed = self.storage.put(key, value)?;
        self.cache.write(key, value);
        Ok(if existed {
            PutOutcome::Updated
        } else {
            PutOutcome::Inserted
        })
    }

    /// Returns whether the key existed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let _guard = self.stripe(key).write();
        self.cache.delete(key);
        self.storage.delete(key)
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        let _guard = self.stripe(key).read();
        Ok(self.cache.contains(key) || self.storage.exists(key)?)
    }

    pub fn entries(&self) -> Result<Vec<(String, String)>> {
        self.storage.entries()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.storage.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use corelib::CacheStrategy;

    use super::*;

    fn store() -> KvStore {
        KvStore::new(
            Box::new(MemoryStorage::new()),
            cache_for(CacheStrategy::Lru, 2),
        )
    }

    #[test]
    fn test_put_get_delete_cycle() {
        let store = store();
        assert_eq!(store.put("k", "v").unwrap(), PutOutcome::Inserted);
        assert_eq!(store.put("k", "w").unwrap(), PutOutcome::Updated);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("w"));
        assert!(store.delete("k").unwrap());
        assert_eq!(store.get("k").unwrap(), None);
        assert!(!store.delete("k").unwrap());
    }

    #[test]
    fn test_reads_past_cache_capacity() {
        let store = store();
        for i in 0..5 {
            store.put(&format!("k{i}"), &format!("v{i}")).unwrap();
        }
        for i in 0..5 {
            assert_eq!(store.get(&format!("k{i}")).unwrap(), Some(format!("v{i}")));
        }
        assert_eq!(store.len().unwrap(), 5);
    }

    #[test]
    fn test_concurrent_writers_distinct_keys() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.put(&format!("t{t}-{i}"), "x").unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len().unwrap(), 400);
    }
}
