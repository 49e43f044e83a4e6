//! Top-level engine: wires the WAL, cache tier, index manager, entity
//! store, query engine, graph engine, and performance monitor together
//! behind the `EngineConfig` (spec §2 "System Overview").
//!
//! Grounded on the teacher's `DatabaseConnection`/`ConnectionPool`
//! composition root in `database/connection_pool.rs`: one struct owns every
//! collaborator's lifetime and exposes a narrow façade, with admission
//! control via a counting semaphore mirroring `enterprise/database`'s pool
//! checkout.

use crate::cache::CacheTier;
use crate::config::EngineConfig;
use crate::entity::Entity;
use crate::error::{FiberError, FiberResult};
use crate::graph::{GraphEngine, GraphResult, ReturnType, Traversal};
use crate::index::IndexManager;
use crate::perf::{PerfMonitor, QuerySample, TracingAlertSink};
use crate::query::{Decryptor, QueryDescriptor, QueryEngine, QueryResult};
use crate::store::EntityStore;
use crate::wal::Wal;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Own a counting semaphore without pulling in `tokio` for a synchronous
/// admission gate. Acquiring blocks never; instead `try_acquire` is used and
/// callers are turned away with `CapacityExceeded` when the count is
/// exhausted, matching spec §5's "excess callers queue and may themselves
/// time out" contract at the embedding layer (the embedder decides whether
/// to retry).
mod admission {
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct Semaphore {
        limit: usize,
        in_flight: AtomicUsize,
    }

    pub struct Permit<'a>(&'a Semaphore);

    impl Drop for Permit<'_> {
        fn drop(&mut self) {
            self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Semaphore {
        pub fn new(limit: usize) -> Self {
            Self {
                limit,
                in_flight: AtomicUsize::new(0),
            }
        }

        pub fn try_acquire(&self) -> Option<Permit<'_>> {
            let mut current = self.in_flight.load(Ordering::SeqCst);
            loop {
                if current >= self.limit {
                    return None;
                }
                match self.in_flight.compare_exchange_weak(
                    current,
                    current + 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => return Some(Permit(self)),
                    Err(observed) => current = observed,
                }
            }
        }
    }
}

/// The embeddable FiberDB engine: one instance per open data directory.
pub struct Engine {
    config: EngineConfig,
    store: EntityStore,
    perf: PerfMonitor,
    admission: admission::Semaphore,
    decryptor: Option<Arc<dyn Decryptor>>,
}

impl Engine {
    /// Open (or recover) an engine rooted at `config.data_path`, replaying
    /// the WAL and rebuilding indexes before returning.
    pub fn open(config: EngineConfig) -> FiberResult<Self> {
        Self::open_with_decryptor(config, None)
    }

    /// Same as [`Engine::open`], additionally wiring a decryptor used to
    /// resolve `__secure` fields when a query supplies `decryptionKey`.
    pub fn open_with_decryptor(
        config: EngineConfig,
        decryptor: Option<Arc<dyn Decryptor>>,
    ) -> FiberResult<Self> {
        let wal = Wal::open(&config.data_path, config.compaction_threshold, config.wal_enabled)?;
        let cache = CacheTier::new(config.cache_size, config.file_exists_cache_ttl);
        let index = IndexManager::new();
        let store = EntityStore::open(wal, cache, index, config.indexing_enabled)?;
        let perf = PerfMonitor::new(Box::new(TracingAlertSink));
        let admission = admission::Semaphore::new(config.max_concurrent_queries);

        Ok(Self {
            config,
            store,
            perf,
            admission,
            decryptor,
        })
    }

    /// The backing entity store, for direct CRUD bypassing the query
    /// engine (used by the migrator and by callers that already know the
    /// key).
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// The performance monitor, for embedders that want to read snapshots
    /// or register additional alert rules via [`PerfMonitor::with_rules`]
    /// at construction time.
    pub fn perf(&self) -> &PerfMonitor {
        &self.perf
    }

    /// Save (insert or overwrite) an entity.
    pub fn save_entity(&self, entity: Entity) -> FiberResult<Entity> {
        self.store.save_entity(entity)
    }

    /// Fetch an entity by `(type, id)`; absent is `None`, never an error.
    pub fn get_entity(&self, entity_type: &str, id: &str) -> Option<Entity> {
        self.store.get_entity(entity_type, id)
    }

    /// Delete an entity by `(type, id)`.
    pub fn delete_entity(&self, entity_type: &str, id: &str) -> FiberResult<()> {
        self.store.delete_entity(entity_type, id)
    }

    /// Execute a query under the admission semaphore and a wall-clock
    /// deadline, recording the outcome into the performance monitor.
    pub fn query(&self, mut descriptor: QueryDescriptor) -> FiberResult<QueryResult> {
        if descriptor.ttl_days == 0 {
            descriptor.ttl_days = self.config.default_ttl_days;
        }
        if descriptor.decryption_key.is_none() && self.config.encryption_enabled {
            descriptor.decryption_key = self.config.default_encryption_key.clone();
        }
        descriptor.timeout = Some(self.config.query_timeout);

        let Some(_permit) = self.admission.try_acquire() else {
            return Err(FiberError::CapacityExceeded {
                retry_after: Duration::from_millis(50),
            });
        };

        let engine = QueryEngine::new(&self.store, self.decryptor.as_deref());

        let start = Instant::now();
        let result = engine.execute(&descriptor);

        match &result {
            Ok(r) => self.record_query_sample(start.elapsed(), r.query_cache_hit, false),
            Err(_) => self.record_query_sample(start.elapsed(), false, true),
        }

        result
    }

    fn record_query_sample(&self, duration: Duration, cache_hit: bool, errored: bool) {
        if !self.config.enable_metrics {
            return;
        }
        self.perf.record_query(QuerySample {
            at: Utc::now(),
            duration,
            cache_hit,
            errored,
        });
    }

    /// Run a graph traversal over the current entity state. A fresh
    /// [`GraphEngine`] is built per call so its inverted edge index always
    /// reflects the latest writes.
    pub fn query_graph(
        &self,
        start_nodes: &[String],
        traversal: &Traversal,
        return_type: ReturnType,
    ) -> GraphResult {
        let graph = GraphEngine::new(&self.store);
        graph.query_graph(start_nodes, traversal, return_type)
    }

    /// Find all shortest paths between two nodes, up to `max_depth`.
    pub fn find_path(&self, from: &str, to: &str, max_depth: usize) -> Vec<crate::graph::Path> {
        let graph = GraphEngine::new(&self.store);
        graph.find_path(from, to, max_depth)
    }

    /// Active configuration, for adapters that need to echo e.g.
    /// `query_timeout` in diagnostics.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> EngineConfig {
        EngineConfig {
            data_path: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn save_and_get_round_trip_through_the_engine() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(test_config(dir.path())).unwrap();
        engine.save_entity(Entity::new("customer", "c1", Utc::now())).unwrap();
        assert!(engine.get_entity("customer", "c1").is_some());
    }

    #[test]
    fn query_with_missing_primary_is_invalid() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(test_config(dir.path())).unwrap();
        let result = engine.query(QueryDescriptor::default());
        assert!(matches!(result, Err(FiberError::InvalidQuery(_))));
    }

    #[test]
    fn admission_semaphore_rejects_beyond_capacity() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.max_concurrent_queries = 1;
        let engine = Engine::open(config).unwrap();

        let permit = engine.admission.try_acquire().unwrap();
        let result = engine.query(QueryDescriptor {
            primary: "customer".into(),
            ..Default::default()
        });
        assert!(matches!(result, Err(FiberError::CapacityExceeded { .. })));
        drop(permit);
    }
}
