//! Bounded LRU cache with hit/miss statistics.
//!
//! Wraps the `lru` crate (declared by the teacher's `Cargo.toml` but never
//! actually reached for — CADDY hand-rolls its own Vec-based LRU in
//! `enterprise/cache/tier.rs`). Here it backs the document cache and the
//! query-result cache described in spec §4.3, with the statistics struct
//! shaped the way `database::cache::CacheStats` tracks hits/misses/size.

use lru::LruCache as RawLru;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Point-in-time hit/miss/size snapshot for one cache instance.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Current number of entries.
    pub size: usize,
    /// Configured maximum number of entries.
    pub max_size: usize,
    /// Cumulative cache hits.
    pub hits: u64,
    /// Cumulative cache misses.
    pub misses: u64,
    /// `hits / (hits + misses)`, 0.0 if no lookups have happened yet.
    pub hit_rate: f64,
}

struct Counters {
    hits: u64,
    misses: u64,
}

/// Pure LRU cache: `get` promotes the touched key to most-recently-used;
/// `set` evicts the least-recently-used entry once `max_size` is exceeded.
pub struct LruCache<K, V> {
    inner: Mutex<RawLru<K, V>>,
    counters: Mutex<Counters>,
    max_size: usize,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache bounded to `max_size` entries (at least 1).
    pub fn new(max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).unwrap();
        Self {
            inner: Mutex::new(RawLru::new(capacity)),
            counters: Mutex::new(Counters { hits: 0, misses: 0 }),
            max_size,
        }
    }

    /// Look up `key`, promoting it to most-recently-used on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let found = inner.get(key).cloned();
        let mut counters = self.counters.lock();
        if found.is_some() {
            counters.hits += 1;
        } else {
            counters.misses += 1;
        }
        found
    }

    /// Look up `key` without affecting hit/miss statistics or recency
    /// (used by invalidation sweeps that need to inspect keys).
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner.lock().peek(key).cloned()
    }

    /// Insert or replace `key`, evicting the LRU entry if the cache is at
    /// capacity.
    pub fn set(&self, key: K, value: V) {
        self.inner.lock().put(key, value);
    }

    /// Remove `key`, returning the evicted value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().pop(key)
    }

    /// Remove every entry for which `predicate` returns true. Used by
    /// `invalidate_entity_caches` to purge query-cache rows referencing a
    /// written entity type.
    pub fn retain_unless<F>(&self, mut predicate: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut inner = self.inner.lock();
        let doomed: Vec<K> = inner
            .iter()
            .filter(|(k, v)| predicate(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            inner.pop(&key);
        }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot hit/miss/size statistics.
    pub fn stats(&self) -> CacheStats {
        let counters = self.counters.lock();
        let total = counters.hits + counters.misses;
        CacheStats {
            size: self.len(),
            max_size: self.max_size,
            hits: counters.hits,
            misses: counters.misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                counters.hits as f64 / total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let cache: LruCache<&str, i32> = LruCache::new(2);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.get(&"a"); // touch a, making b the LRU entry
        cache.set("c", 3); // evicts b
        assert!(cache.peek(&"b").is_none());
        assert!(cache.peek(&"a").is_some());
        assert!(cache.peek(&"c").is_some());
    }

    #[test]
    fn tracks_hit_rate() {
        let cache: LruCache<&str, i32> = LruCache::new(10);
        cache.set("a", 1);
        cache.get(&"a");
        cache.get(&"missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn retain_unless_purges_matching_entries() {
        let cache: LruCache<String, i32> = LruCache::new(10);
        cache.set("customer:c1".into(), 1);
        cache.set("user:u1".into(), 2);
        cache.retain_unless(|k, _| k.starts_with("customer:"));
        assert!(cache.peek(&"customer:c1".to_string()).is_none());
        assert!(cache.peek(&"user:u1".to_string()).is_some());
    }
}
