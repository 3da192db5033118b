//! Bounded LRU cache split into independently locked shards.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use lru::LruCache;
use sha2::{Digest, Sha256};

/// Hex SHA-256 of `content`, used as a content-addressed cache key.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

pub struct ShardedLru<K, V> {
    shards: Vec<Mutex<LruCache<K, V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Hash + Eq, V: Clone> ShardedLru<K, V> {
    /// `capacity` is split evenly across `shards` (each shard holds at least one entry).
    pub fn new(capacity: usize, shards: usize) -> Self {
        let shards = shards.max(1);
        let per_shard = NonZeroUsize::new(capacity.div_ceil(shards)).unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: (0..shards).map(|_| Mutex::new(LruCache::new(per_shard))).collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &K) -> &Mutex<LruCache<K, V>> {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        let idx = (h.finish() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let found = self
            .shard(key)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn insert(&self, key: K, value: V) {
        self.shard(&key)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, value);
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for s in &self.shards {
            s.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn bounded_and_counts_lookups() {
        let c: ShardedLru<u32, u32> = ShardedLru::new(4, 1);
        for i in 0..10 {
            c.insert(i, i * 2);
        }
        assert_eq!(c.len(), 4);
        assert_eq!(c.get(&9), Some(18));
        assert_eq!(c.get(&0), None);
        assert_eq!((c.hits(), c.misses()), (1, 1));
    }

    #[test]
    fn least_recently_used_goes_first() {
        let c: ShardedLru<&str, u8> = ShardedLru::new(2, 1);
        c.insert("a", 1);
        c.insert("b", 2);
        assert_eq!(c.get(&"a"), Some(1));
        c.insert("c", 3);
        assert_eq!(c.get(&"b"), None);
        assert_eq!(c.get(&"a"), Some(1));
    }

    #[test]
    fn content_hash_is_stable_hex() {
        let h = content_hash("Hello {{name}}!");
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_hash("Hello {{name}}!"));
        assert_ne!(h, content_hash("Hello {{name}}"));
    }

    #[test]
    fn shards_share_total_capacity() {
        let c: ShardedLru<u32, ()> = ShardedLru::new(64, 8);
        for i in 0..1000 {
            c.insert(i, ());
        }
        assert!(c.len() <= 64);
        c.clear();
        assert!(c.is_empty());
    }
}
