//! Bounded in-memory cache in front of storage.
//!
//! All three eviction policies share one structure: a priority queue keyed by
//! `(frequency, last touch)`, evicting the smallest. FIFO never refreshes a
//! key's priority, LRU refreshes it on every touch, LFU also counts touches.

use std::cmp::Reverse;
use std::collections::HashMap;

use corelib::CacheStrategy;
use parking_lot::Mutex;
use priority_queue::PriorityQueue;

pub trait Cache: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: &str);
    fn delete(&self, key: &str);
    fn contains(&self, key: &str) -> bool;
}

/// Build the cache a server was configured with.
pub fn cache_for(strategy: CacheStrategy, capacity: usize) -> Box<dyn Cache> {
    match strategy {
        CacheStrategy::None => Box::new(NoCache),
        _ if capacity == 0 => Box::new(NoCache),
        _ => Box::new(BoundedCache::new(strategy, capacity)),
    }
}

/// Caching disabled.
#[derive(Debug, Default)]
pub struct NoCache;

impl Cache for NoCache {
    fn read(&self, _key: &str) -> Option<String> {
        None
    }

    fn write(&self, _key: &str, _value: &str) {}

    fn delete(&self, _key: &str) {}

    fn contains(&self, _key: &str) -> bool {
        false
    }
}

type Rank = Reverse<(u64, u64)>;

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, String>,
    order: PriorityQueue<String, Rank>,
    clock: u64,
}

#[derive(Debug)]
pub struct BoundedCache {
    strategy: CacheStrategy,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl BoundedCache {
    pub fn new(strategy: CacheStrategy, capacity: usize) -> Self {
        Self {
            strategy,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn touch(&self, inner: &mut Inner, key: &str) {
        inner.clock += 1;
        let now = inner.clock;
        let strategy = self.strategy;
        inner.order.change_priority_by(key, |Reverse((freq, at))| match strategy {
            CacheStrategy::Lru => *at = now,
            CacheStrategy::Lfu => {
                *freq += 1;
                *at = now;
            }
            _ => {}
        });
    }
}

impl Cache for BoundedCache {
    fn read(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        let value = inner.values.get(key).cloned()?;
        self.touch(&mut inner, key);
        Some(value)
    }

    fn write(&self, key: &str, value: &str) {
        let mut inner = self.inner.lock();
        if inner.values.contains_key(key) {
            inner.values.insert(key.to_string(), value.to_string());
            self.touch(&mut inner, key);
            return;
        }
        while inner.values.len() >= self.capacity {
            match inner.order.pop() {
                Some((evicted, _)) => {
                    inner.values.remove(&evicted);
                }
                None => break,
            }
        }
        inner.clock += 1;
        let rank = Reverse((1, inner.clock));
        inner.values.insert(key.to_string(), value.to_string());
        inner.order.push(key.to_string(), rank);
    }

    fn delete(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.values.remove(key);
        inner.order.remove(key);
    }

    fn contains(&self, key: &str) -> bool {
        self.inner.lock().values.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(strategy: CacheStrategy) -> BoundedCache {
        let cache = BoundedCache::new(strategy, 3);
        cache.write("a", "1");
        cache.write("b", "2");
        cache.write("c", "3");
        cache
    }

    #[test]
    fn test_fifo_evicts_oldest_insert() {
        let cache = filled(CacheStrategy::Fifo);
        cache.read("a");
        cache.write("a", "1b");
        cache.write("d", "4");
        assert!(!cache.contains("a"));
        assert!(cache.contains("b") && cache.contains("c") && cache.contains("d"));
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let cache = filled(CacheStrategy::Lru);
        cache.read("a");
        cache.write("d", "4");
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_lfu_evicts_least_frequent() {
        let cache = filled(CacheStrategy::Lfu);
        cache.read("a");
        cache.read("a");
        cache.read("b");
        cache.write("d", "4");
        assert!(!cache.contains("c"));
        cache.write("e", "5");
        // d was touched once; a and b more often.
        assert!(!cache.contains("d"));
        assert!(cache.contains("a") && cache.contains("b") && cache.contains("e"));
    }

    #[test]
    fn test_update_and_delete() {
        let cache = filled(CacheStrategy::Lru);
        cache.write("b", "22");
        assert_eq!(cache.read("b").as_deref(), Some("22"));
        cache.delete("b");
        assert_eq!(cache.read("b"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_disabled_cache() {
        let cache = cache_for(CacheStrategy::None, 10);
        cache.write("a", "1");
        assert!(!cache.contains("a"));
        let cache = cache_for(CacheStrategy::Lru, 0);
        cache.write("a", "1");
        assert_eq!(cache.read("a"), None);
    }
}
