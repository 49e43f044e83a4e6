//! Three-cache tier: document cache, query-result cache, file-existence
//! cache — the tier described in spec §4.3.

pub mod lru_cache;
pub mod ttl_cache;

use crate::entity::{key_string, Entity};
use crate::value::Value;
use lru_cache::{CacheStats, LruCache};
use std::time::Duration;
use ttl_cache::TtlCache;

/// Canonical cache names used by the HTTP adapter's `GET /cache` surface
/// (spec §6). Exposed here so adapters don't hardcode the strings.
pub mod names {
    /// Document cache.
    pub const DOCUMENT_CACHE: &str = "document-cache";
    /// Query-result cache.
    pub const QUERY_CACHE: &str = "query-cache";
    /// File-existence cache.
    pub const FILE_EXISTS_CACHE: &str = "file-exists-cache";
}

/// A cached query result row set, tagged with the primary entity type so
/// `invalidate_entity_caches` can purge it without re-parsing the cache key.
#[derive(Debug, Clone)]
pub struct CachedQueryResult {
    /// Primary entity type the query descriptor targeted.
    pub primary_type: String,
    /// Projected rows.
    pub rows: Vec<Value>,
}

/// `{name, size, maxSize, hits, misses, hitRate}` for one cache, as
/// returned by the `GET /cache` adapter surface.
#[derive(Debug, Clone)]
pub struct NamedCacheStats {
    /// One of the `names::*` constants.
    pub name: &'static str,
    /// Wrapped hit/miss/size snapshot.
    pub stats: CacheStats,
}

/// The full cache tier owned by an [`crate::engine::Engine`].
pub struct CacheTier {
    document: LruCache<String, Entity>,
    query: LruCache<String, CachedQueryResult>,
    file_exists: TtlCache<String, bool>,
}

impl CacheTier {
    /// Build a cache tier with `max_size` entries for the document and
    /// query-result caches, and `file_exists_ttl` as the file-existence
    /// cache's default TTL.
    pub fn new(max_size: usize, file_exists_ttl: Duration) -> Self {
        Self {
            document: LruCache::new(max_size),
            query: LruCache::new(max_size),
            file_exists: TtlCache::new(max_size, file_exists_ttl),
        }
    }

    /// Look up a cached entity by `(type, id)`.
    pub fn get_entity(&self, entity_type: &str, id: &str) -> Option<Entity> {
        self.document.get(&key_string(entity_type, id))
    }

    /// Populate the document cache on a read-miss.
    pub fn put_entity(&self, entity: &Entity) {
        self.document.set(entity.canonical_key(), entity.clone());
    }

    /// Evict a single document-cache entry.
    pub fn evict_entity(&self, entity_type: &str, id: &str) {
        self.document.remove(&key_string(entity_type, id));
    }

    /// Look up a cached query result by its canonical descriptor key.
    pub fn get_query(&self, cache_key: &str) -> Option<CachedQueryResult> {
        self.query.get(&cache_key.to_string())
    }

    /// Cache a query result under its canonical descriptor key.
    pub fn put_query(&self, cache_key: String, result: CachedQueryResult) {
        self.query.set(cache_key, result);
    }

    /// Look up the file-existence cache.
    pub fn file_exists(&self, path: &str) -> Option<bool> {
        self.file_exists.get(&path.to_string())
    }

    /// Populate the file-existence cache with the default TTL.
    pub fn set_file_exists(&self, path: String, exists: bool) {
        self.file_exists.set(path, exists);
    }

    /// Populate the file-existence cache with a per-entry TTL override.
    pub fn set_file_exists_with_ttl(&self, path: String, exists: bool, ttl: Duration) {
        self.file_exists.set_with_ttl(path, exists, ttl);
    }

    /// Evict the document-cache entry for `(type, id)` and purge every
    /// query-cache entry whose cached result was produced against `type`.
    /// Cache entries never dominate truth: on any write, the affected
    /// cache state is dropped rather than patched in place.
    pub fn invalidate_entity_caches(&self, entity_type: &str, id: &str) {
        self.evict_entity(entity_type, id);
        let target = entity_type.to_string();
        self.query.retain_unless(|_, cached| cached.primary_type == target);
    }

    /// Clear every cache in the tier (`DELETE /cache` adapter surface).
    pub fn clear_all(&self) {
        self.document.clear();
        self.query.clear();
        self.file_exists.clear();
    }

    /// Stats for all three caches, in the canonical order used by the
    /// `GET /cache` adapter surface.
    pub fn all_stats(&self) -> Vec<NamedCacheStats> {
        vec![
            NamedCacheStats {
                name: names::DOCUMENT_CACHE,
                stats: self.document.stats(),
            },
            NamedCacheStats {
                name: names::QUERY_CACHE,
                stats: self.query.stats(),
            },
            NamedCacheStats {
                name: names::FILE_EXISTS_CACHE,
                stats: self.file_exists.stats(),
            },
        ]
    }

    /// Combined hit rate across document + query caches, used by
    /// `EntityStore::stats()`'s `cacheHitRate` field.
    pub fn combined_hit_rate(&self) -> f64 {
        let doc = self.document.stats();
        let query = self.query.stats();
        let total_hits = doc.hits + query.hits;
        let total = doc.hits + doc.misses + query.hits + query.misses;
        if total == 0 {
            0.0
        } else {
            total_hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(entity_type: &str, id: &str) -> Entity {
        Entity::new(entity_type, id, Utc::now())
    }

    #[test]
    fn invalidate_purges_document_and_matching_query_entries() {
        let tier = CacheTier::new(10, Duration::from_secs(5));
        let e = sample("customer", "c1");
        tier.put_entity(&e);
        tier.put_query(
            "q1".into(),
            CachedQueryResult {
                primary_type: "customer".into(),
                rows: vec![],
            },
        );
        tier.put_query(
            "q2".into(),
            CachedQueryResult {
                primary_type: "user".into(),
                rows: vec![],
            },
        );

        tier.invalidate_entity_caches("customer", "c1");

        assert!(tier.get_entity("customer", "c1").is_none());
        assert!(tier.get_query("q1").is_none());
        assert!(tier.get_query("q2").is_some());
    }

    #[test]
    fn clear_all_empties_every_cache() {
        let tier = CacheTier::new(10, Duration::from_secs(5));
        tier.put_entity(&sample("customer", "c1"));
        tier.set_file_exists("path".into(), true);
        tier.clear_all();
        assert!(tier.get_entity("customer", "c1").is_none());
        assert!(tier.file_exists("path").is_none());
    }
}
