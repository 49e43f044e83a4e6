//! Bounded TTL cache used for the file-existence cache (spec §4.3).
//!
//! On `get`, an entry older than its TTL is treated as absent and lazily
//! removed — the same "expired means gone" contract as
//! `database::cache::CacheEntry::is_expired`, generalized from
//! wall-clock-seconds bookkeeping to `Instant`-based TTLs with a default
//! plus optional per-entry override.

use lru::LruCache as RawLru;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use super::lru_cache::CacheStats;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

struct Counters {
    hits: u64,
    misses: u64,
}

/// LRU-bounded cache where entries additionally expire after a TTL.
pub struct TtlCache<K, V> {
    inner: Mutex<RawLru<K, Entry<V>>>,
    counters: Mutex<Counters>,
    default_ttl: Duration,
    max_size: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache bounded to `max_size` entries with `default_ttl`
    /// applied to entries inserted via [`TtlCache::set`].
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).unwrap();
        Self {
            inner: Mutex::new(RawLru::new(capacity)),
            counters: Mutex::new(Counters { hits: 0, misses: 0 }),
            default_ttl,
            max_size,
        }
    }

    /// Insert `key` with the cache's default TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert `key` with a per-entry TTL override.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.inner.lock().put(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Look up `key`; an expired entry is removed and counted as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = matches!(inner.peek(key), Some(entry) if entry.inserted_at.elapsed() > entry.ttl);
        if expired {
            inner.pop(key);
        }
        let found = inner.get(key).map(|e| e.value.clone());
        drop(inner);

        let mut counters = self.counters.lock();
        if found.is_some() {
            counters.hits += 1;
        } else {
            counters.misses += 1;
        }
        found
    }

    /// Remove `key` unconditionally.
    pub fn remove(&self, key: &K) {
        self.inner.lock().pop(key);
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Current entry count, including not-yet-lazily-evicted expired
    /// entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
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
    fn expired_entries_are_treated_as_absent() {
        let cache: TtlCache<&str, i32> = TtlCache::new(10, Duration::from_millis(5));
        cache.set("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn per_entry_ttl_overrides_default() {
        let cache: TtlCache<&str, i32> = TtlCache::new(10, Duration::from_secs(60));
        cache.set_with_ttl("a", 1, Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(cache.get(&"a"), None);
    }
}
