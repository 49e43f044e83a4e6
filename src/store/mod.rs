//! Entity store: the WAL-backed, cache-fronted, index-maintained home for
//! every entity. Every other component (query engine, graph engine,
//! migrator) reads and writes entities exclusively through here.
//!
//! Grounded on the teacher's `ConnectionPool`/`Repository` read-through +
//! write-through layering in `database/connection_pool.rs` and
//! `enterprise/database/repository.rs`: a single choke point owns the lock
//! discipline so callers never see partial cache/index/WAL state.

use crate::cache::CacheTier;
use crate::entity::{key_string, Edge, Entity};
use crate::error::{FiberError, FiberResult};
use crate::index::IndexManager;
use crate::wal::{entry_for_delete, entry_for_edge, entry_for_write, Wal};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// `{totalEntities, totalEdges, storageSize, cacheHitRate, averageQueryTime}`
/// (spec §4.2).
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Number of live entities.
    pub total_entities: usize,
    /// Sum of outgoing edges across every entity.
    pub total_edges: usize,
    /// Current `wal.log` size in bytes, as a proxy for on-disk footprint.
    pub storage_size: u64,
    /// Combined document+query cache hit rate.
    pub cache_hit_rate: f64,
    /// Running average query duration, as tracked by the query engine.
    pub average_query_time: Duration,
}

/// The authoritative, in-memory, WAL-durable entity table.
pub struct EntityStore {
    wal: Wal,
    cache: CacheTier,
    index: IndexManager,
    indexing_enabled: bool,
    entities: RwLock<BTreeMap<String, Entity>>,
    query_time_total: AtomicU64,
    query_time_count: AtomicU64,
}

impl EntityStore {
    /// Open (or recover) a store rooted at the WAL's data directory,
    /// replaying the log and, if `indexing_enabled`, rebuilding every
    /// registered index from the recovered state.
    pub fn open(wal: Wal, cache: CacheTier, index: IndexManager, indexing_enabled: bool) -> FiberResult<Self> {
        let entities = wal.replay()?;
        let store = Self {
            wal,
            cache,
            index,
            indexing_enabled,
            entities: RwLock::new(entities),
            query_time_total: AtomicU64::new(0),
            query_time_count: AtomicU64::new(0),
        };
        store.rebuild_indexes();
        Ok(store)
    }

    fn rebuild_indexes(&self) {
        if !self.indexing_enabled {
            return;
        }
        let entities = self.entities.read();
        for entity in entities.values() {
            self.index.on_entity_write(entity);
        }
    }

    /// Access the cache tier (used by the query engine for read-through).
    pub fn cache(&self) -> &CacheTier {
        &self.cache
    }

    /// Access the index manager (used by the query engine for planning).
    pub fn index(&self) -> &IndexManager {
        &self.index
    }

    /// Read an entity by `(type, id)`. A miss is `Ok(None)`, never an error
    /// (spec §7: `NotFound` is not raised by the store's own `get`).
    pub fn get_entity(&self, entity_type: &str, id: &str) -> Option<Entity> {
        if let Some(cached) = self.cache.get_entity(entity_type, id) {
            return Some(cached);
        }
        let key = key_string(entity_type, id);
        let entity = self.entities.read().get(&key).cloned();
        if let Some(entity) = &entity {
            self.cache.put_entity(entity);
        }
        entity
    }

    /// All entities of a given type, in id order.
    pub fn list_by_type(&self, entity_type: &str) -> Vec<Entity> {
        self.entities
            .read()
            .values()
            .filter(|e| e.entity_type == entity_type)
            .cloned()
            .collect()
    }

    /// Create or overwrite `entity`: assigns the next version, appends an
    /// INSERT/UPDATE WAL entry, publishes into memory, invalidates affected
    /// caches, and updates every registered index.
    pub fn save_entity(&self, mut entity: Entity) -> FiberResult<Entity> {
        let key = entity.canonical_key();
        let now = Utc::now();
        let is_update = {
            let entities = self.entities.read();
            if let Some(existing) = entities.get(&key) {
                entity.metadata.version = existing.metadata.version + 1;
                entity.metadata.created = existing.metadata.created;
                true
            } else {
                false
            }
        };
        entity.metadata.updated = now;

        self.wal.write_entry(entry_for_write(&entity, is_update, now))?;

        self.entities.write().insert(key, entity.clone());
        self.cache.invalidate_entity_caches(&entity.entity_type, &entity.id);
        if self.indexing_enabled {
            self.index.on_entity_write(&entity);
        }

        Ok(entity)
    }

    /// Delete `(type, id)`, returning `NotFound` if it doesn't exist.
    pub fn delete_entity(&self, entity_type: &str, id: &str) -> FiberResult<()> {
        let key = key_string(entity_type, id);
        let existed = self.entities.write().remove(&key).is_some();
        if !existed {
            return Err(FiberError::NotFound(key));
        }

        self.wal.write_entry(entry_for_delete(entity_type, id, Utc::now()))?;
        self.cache.invalidate_entity_caches(entity_type, id);
        if self.indexing_enabled {
            self.index.on_entity_delete(entity_type, id);
        }
        Ok(())
    }

    /// Append a new edge to `(type, id)`, assigning it a fresh id if none is
    /// given. Dangling targets are permitted (DESIGN.md orphan-edge policy).
    pub fn add_relationship(
        &self,
        entity_type: &str,
        id: &str,
        edge_type: &str,
        target: &str,
        properties: Option<std::collections::BTreeMap<String, crate::value::Value>>,
    ) -> FiberResult<Edge> {
        let key = key_string(entity_type, id);
        let edge = Edge {
            id: Uuid::new_v4().to_string(),
            edge_type: edge_type.to_string(),
            target: target.to_string(),
            properties,
        };

        let now = Utc::now();
        {
            let mut entities = self.entities.write();
            let entity = entities.get_mut(&key).ok_or_else(|| FiberError::NotFound(key.clone()))?;
            entity.upsert_edge(edge.clone());
            entity.metadata.updated = now;
        }

        self.wal
            .write_entry(entry_for_edge(entity_type, id, edge.clone(), true, now))?;
        self.cache.invalidate_entity_caches(entity_type, id);
        Ok(edge)
    }

    /// Remove an edge by id from `(type, id)`.
    pub fn remove_relationship(&self, entity_type: &str, id: &str, edge_id: &str) -> FiberResult<()> {
        let key = key_string(entity_type, id);
        let now = Utc::now();
        let removed = {
            let mut entities = self.entities.write();
            let entity = entities.get_mut(&key).ok_or_else(|| FiberError::NotFound(key.clone()))?;
            let removed = entity.remove_edge(edge_id);
            entity.metadata.updated = now;
            removed
        };
        let Some(removed) = removed else {
            return Err(FiberError::NotFound(format!("{key}#{edge_id}")));
        };

        self.wal
            .write_entry(entry_for_edge(entity_type, id, removed, false, now))?;
        self.cache.invalidate_entity_caches(entity_type, id);
        Ok(())
    }

    /// Snapshot of all live entities, used by the graph engine to build its
    /// traversal index without holding the store lock during BFS.
    pub fn snapshot_entities(&self) -> Vec<Entity> {
        self.entities.read().values().cloned().collect()
    }

    /// Record a completed query's duration for `stats().average_query_time`.
    pub fn record_query_time(&self, elapsed: Duration) {
        self.query_time_total.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.query_time_count.fetch_add(1, Ordering::Relaxed);
    }

    /// `{totalEntities, totalEdges, storageSize, cacheHitRate, averageQueryTime}`.
    pub fn stats(&self) -> StoreStats {
        let entities = self.entities.read();
        let total_entities = entities.len();
        let total_edges = entities.values().map(|e| e.edges.len()).sum();
        drop(entities);

        let count = self.query_time_count.load(Ordering::Relaxed);
        let average_query_time = if count == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.query_time_total.load(Ordering::Relaxed) / count)
        };

        StoreStats {
            total_entities,
            total_edges,
            storage_size: self.wal.stats().wal_size_bytes,
            cache_hit_rate: self.cache.combined_hit_rate(),
            average_query_time,
        }
    }
}

/// Time a closure and return `(result, elapsed)`, used by the query engine
/// to feed [`EntityStore::record_query_time`].
pub fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let result = f();
    (result, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTier;
    use crate::index::IndexManager;
    use tempfile::tempdir;

    fn store(dir: &std::path::Path) -> EntityStore {
        let wal = Wal::open(dir, 1_000, true).unwrap();
        let cache = CacheTier::new(100, Duration::from_secs(5));
        let index = IndexManager::new();
        EntityStore::open(wal, cache, index, true).unwrap()
    }

    #[test]
    fn save_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let e = Entity::new("customer", "c1", Utc::now());
        store.save_entity(e).unwrap();

        let fetched = store.get_entity("customer", "c1").unwrap();
        assert_eq!(fetched.id, "c1");
    }

    #[test]
    fn save_twice_increments_version_and_preserves_created() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let e1 = store.save_entity(Entity::new("customer", "c1", Utc::now())).unwrap();
        let e2 = store.save_entity(Entity::new("customer", "c1", Utc::now())).unwrap();
        assert_eq!(e2.metadata.version, e1.metadata.version + 1);
        assert_eq!(e2.metadata.created, e1.metadata.created);
    }

    #[test]
    fn delete_missing_entity_is_not_found() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let result = store.delete_entity("customer", "ghost");
        assert!(matches!(result, Err(FiberError::NotFound(_))));
    }

    #[test]
    fn add_relationship_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = store(dir.path());
            store.save_entity(Entity::new("customer", "c1", Utc::now())).unwrap();
            store
                .add_relationship("customer", "c1", "EMPLOYS", "user:u1", None)
                .unwrap();
        }

        let wal = Wal::open(dir.path(), 1_000, true).unwrap();
        let cache = CacheTier::new(100, Duration::from_secs(5));
        let index = IndexManager::new();
        let reopened = EntityStore::open(wal, cache, index, true).unwrap();
        let entity = reopened.get_entity("customer", "c1").unwrap();
        assert_eq!(entity.edges.len(), 1);
        assert_eq!(entity.edges[0].target, "user:u1");
    }

    #[test]
    fn save_invalidates_stale_cache_entry() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.save_entity(Entity::new("customer", "c1", Utc::now())).unwrap();
        store.get_entity("customer", "c1");

        let mut updated = Entity::new("customer", "c1", Utc::now());
        updated.attributes.insert("revenue".into(), crate::value::Value::from(42.0));
        store.save_entity(updated).unwrap();

        let fetched = store.get_entity("customer", "c1").unwrap();
        assert_eq!(fetched.attributes.get("revenue"), Some(&crate::value::Value::from(42.0)));
    }

    #[test]
    fn disabling_indexing_skips_index_maintenance() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path(), 1_000, true).unwrap();
        let cache = CacheTier::new(100, Duration::from_secs(5));
        let index = IndexManager::new();
        index.create_hash_index(
            "customer",
            "name",
            None,
            crate::index::IndexOptions::default(),
            std::iter::empty(),
        );
        let store = EntityStore::open(wal, cache, index, false).unwrap();

        let mut e = Entity::new("customer", "c1", Utc::now());
        e.attributes.insert("name".into(), crate::value::Value::from("Acme"));
        store.save_entity(e).unwrap();

        let condition = crate::predicate::Condition::eq(crate::value::Value::from("Acme"));
        let result = store.index().find_and_query("customer", "name", None, &condition).unwrap();
        assert!(result.matched_ids.is_empty());
    }
}
