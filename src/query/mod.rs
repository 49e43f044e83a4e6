//! Query engine: plans and executes a [`QueryDescriptor`] against the
//! entity store in the eight phases described in the component design —
//! cache check, candidate selection, load, TTL filter, predicate
//! evaluation, projection, paging, publish.
//!
//! Grounded on the teacher's `QueryOptimizer`/`QueryBuilder` pipeline in
//! `database/query_optimizer.rs`: plan-then-execute staging and an explicit
//! `useIndexes` escape hatch to a full scan, generalized from SQL
//! predicate pushdown to FiberDB's index-manager posting-list intersection.

use crate::cache::CachedQueryResult;
use crate::entity::Entity;
use crate::error::{FiberError, FiberResult};
use crate::predicate::{parse_condition, Condition};
use crate::store::{timed, EntityStore};
use crate::value::Value;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

/// `{primary, id?, filter?, where?, include?, limit?, offset?, skipCache?,
/// skipTTL?, useParallel?, useIndexes?, includePerformanceMetrics?,
/// decryptionKey?}` (spec §4.5).
#[derive(Debug, Clone, Default)]
pub struct QueryDescriptor {
    /// Entity type to query.
    pub primary: String,
    /// Single-entity shortcut; when set, candidates = `{id}`.
    pub id: Option<String>,
    /// Predicates on primary attributes.
    pub filter: BTreeMap<String, serde_json::Value>,
    /// Predicates on nested document fields, keyed `"<attached>.<field>"`.
    pub where_clause: BTreeMap<String, serde_json::Value>,
    /// Projection list; `["*"]` or absent means the full entity.
    pub include: Option<Vec<String>>,
    /// Max rows to return after offset.
    pub limit: Option<usize>,
    /// Rows to skip before limiting.
    pub offset: Option<usize>,
    /// Bypass the query-result cache entirely.
    pub skip_cache: bool,
    /// Bypass TTL filtering.
    pub skip_ttl: bool,
    /// Load candidates with bounded parallel fan-out.
    pub use_parallel: bool,
    /// Consult the index manager during candidate selection.
    pub use_indexes: bool,
    /// Attach `__metrics` to the first returned row.
    pub include_performance_metrics: bool,
    /// When set, `__secure` fields are decrypted via the injected decryptor
    /// rather than returned as ciphertext.
    pub decryption_key: Option<String>,
    /// TTL window in days, used by phase 4. Supplied by the engine from
    /// `EngineConfig::default_ttl_days`; not part of the wire descriptor.
    pub ttl_days: u32,
    /// Per-query wall-clock budget (spec §5 cancellation contract), checked
    /// at each phase boundary starting from the moment `execute` begins.
    /// Supplied by the engine from `EngineConfig::query_timeout`; `None`
    /// disables cancellation, which is what direct `QueryEngine` callers
    /// (e.g. tests) get by default.
    pub timeout: Option<Duration>,
}

/// Collaborator invoked for `__secure` field decryption. FiberDB does not
/// implement cryptography itself (spec §9 open question: decryption is an
/// injected collaborator).
pub trait Decryptor: Send + Sync {
    /// Decrypt `ciphertext` using `key`, returning the plaintext value.
    fn decrypt(&self, ciphertext: &Value, key: &str) -> FiberResult<Value>;
}

/// One row of a query result: the projected value plus whether it came
/// from the query cache.
#[derive(Debug, Clone)]
pub struct QueryRow {
    /// Projected entity/document payload.
    pub value: Value,
}

/// Full result of [`QueryEngine::execute`].
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Projected, paged rows.
    pub rows: Vec<QueryRow>,
    /// Whether phase 1 (cache check) short-circuited execution.
    pub query_cache_hit: bool,
    /// Per-phase timing, attached to the first row as `__metrics` when
    /// requested.
    pub metrics: QueryMetrics,
}

/// Timing breakdown for one query execution.
#[derive(Debug, Clone, Default)]
pub struct QueryMetrics {
    /// Total wall time across every phase.
    pub total: Duration,
    /// Time spent selecting candidates (index lookup or full scan).
    pub candidate_selection: Duration,
    /// Time spent loading candidate entities.
    pub load: Duration,
    /// True if at least one filter/where clause was answered by an index.
    pub used_index: bool,
}

/// Executes [`QueryDescriptor`]s against an [`EntityStore`].
pub struct QueryEngine<'a> {
    store: &'a EntityStore,
    decryptor: Option<&'a dyn Decryptor>,
}

impl<'a> QueryEngine<'a> {
    /// Build a query engine over `store`, optionally with a decryptor for
    /// `__secure` field resolution.
    pub fn new(store: &'a EntityStore, decryptor: Option<&'a dyn Decryptor>) -> Self {
        Self { store, decryptor }
    }

    /// Run `descriptor` through all eight phases.
    pub fn execute(&self, descriptor: &QueryDescriptor) -> FiberResult<QueryResult> {
        if descriptor.primary.is_empty() {
            return Err(FiberError::InvalidQuery("missing primary".into()));
        }

        let (result, elapsed) = timed(|| self.execute_inner(descriptor));
        let result = result?;
        self.store.record_query_time(elapsed);
        Ok(result)
    }

    fn execute_inner(&self, descriptor: &QueryDescriptor) -> FiberResult<QueryResult> {
        let cache_key = cache_key_for(descriptor);

        // Phase 1: cache check.
        if !descriptor.skip_cache {
            if let Some(cached) = self.store.cache().get_query(&cache_key) {
                return Ok(QueryResult {
                    rows: cached.rows.into_iter().map(|value| QueryRow { value }).collect(),
                    query_cache_hit: true,
                    metrics: QueryMetrics::default(),
                });
            }
        }

        let deadline = descriptor.timeout.map(|budget| Instant::now() + budget);
        let mut metrics = QueryMetrics::default();

        // Phase 2: candidate selection.
        let (candidate_ids, candidate_elapsed) = timed(|| self.select_candidates(descriptor, &mut metrics));
        metrics.candidate_selection = candidate_elapsed;
        let candidate_ids = candidate_ids?;
        check_deadline(deadline, descriptor.timeout)?;

        // Phase 3: load.
        let (entities, load_elapsed) = timed(|| self.load_candidates(&candidate_ids, descriptor));
        metrics.load = load_elapsed;
        let entities = entities;
        check_deadline(deadline, descriptor.timeout)?;

        // Phase 4: TTL filter.
        let entities = if descriptor.skip_ttl {
            entities
        } else {
            entities
                .into_iter()
                .filter(|e| passes_ttl(e, descriptor.ttl_days))
                .collect()
        };
        check_deadline(deadline, descriptor.timeout)?;

        // Phase 5: predicate evaluation.
        let filters = parse_conditions(&descriptor.filter)?;
        let where_clauses = parse_conditions(&descriptor.where_clause)?;
        let entities: Vec<Entity> = entities
            .into_iter()
            .filter(|e| matches_filters(e, &filters) && matches_where(e, &where_clauses))
            .collect();
        check_deadline(deadline, descriptor.timeout)?;

        // Phase 6: projection.
        let mut rows: Vec<Value> = entities
            .iter()
            .map(|e| self.project(e, descriptor))
            .collect::<FiberResult<Vec<_>>>()?;
        check_deadline(deadline, descriptor.timeout)?;

        // Phase 7: paging.
        let offset = descriptor.offset.unwrap_or(0);
        if offset > 0 {
            rows = rows.into_iter().skip(offset).collect();
        }
        if let Some(limit) = descriptor.limit {
            rows.truncate(limit);
        }

        metrics.total = metrics.candidate_selection + metrics.load;

        // Phase 8: publish.
        if !descriptor.skip_cache {
            self.store.cache().put_query(
                cache_key,
                CachedQueryResult {
                    primary_type: descriptor.primary.clone(),
                    rows: rows.clone(),
                },
            );
        }

        if descriptor.include_performance_metrics {
            if let Some(first) = rows.first_mut() {
                if let Value::Object(map) = first {
                    map.insert("__metrics".into(), metrics_to_value(&metrics));
                }
            }
        }

        Ok(QueryResult {
            rows: rows.into_iter().map(|value| QueryRow { value }).collect(),
            query_cache_hit: false,
            metrics,
        })
    }

    fn select_candidates(
        &self,
        descriptor: &QueryDescriptor,
        metrics: &mut QueryMetrics,
    ) -> FiberResult<HashSet<String>> {
        if let Some(id) = &descriptor.id {
            return Ok(HashSet::from([id.clone()]));
        }

        if !descriptor.use_indexes {
            return Ok(self.full_scan_ids(&descriptor.primary));
        }

        let mut intersection: Option<HashSet<String>> = None;
        let mut any_index_used = false;

        for (field, raw) in &descriptor.filter {
            let Some(condition) = parse_condition(raw) else {
                return Err(FiberError::InvalidQuery(format!("unknown operator for field {field}")));
            };
            if let Some(result) = self.store.index().find_and_query(&descriptor.primary, field, None, &condition) {
                any_index_used = true;
                intersection = Some(intersect(intersection, result.matched_ids));
            }
        }

        for (path, raw) in &descriptor.where_clause {
            let Some((attached, field)) = path.split_once('.') else {
                return Err(FiberError::InvalidQuery(format!("malformed where path: {path}")));
            };
            let Some(condition) = parse_condition(raw) else {
                return Err(FiberError::InvalidQuery(format!("unknown operator for path {path}")));
            };
            if let Some(result) = self
                .store
                .index()
                .find_and_query(&descriptor.primary, field, Some(attached), &condition)
            {
                any_index_used = true;
                intersection = Some(intersect(intersection, result.matched_ids));
            }
        }

        metrics.used_index = any_index_used;

        match intersection {
            Some(ids) => Ok(ids),
            None => {
                // No clause was answerable by an index: non-fatal, fall back
                // to a full scan of the primary type (spec §4.5 phase 2,
                // §7 "index-manager failure is non-fatal").
                Ok(self.full_scan_ids(&descriptor.primary))
            }
        }
    }

    fn full_scan_ids(&self, primary: &str) -> HashSet<String> {
        self.store.list_by_type(primary).into_iter().map(|e| e.id).collect()
    }

    fn load_candidates(&self, ids: &HashSet<String>, descriptor: &QueryDescriptor) -> Vec<Entity> {
        let mut ordered: Vec<&String> = ids.iter().collect();
        ordered.sort();

        if descriptor.use_parallel {
            ordered
                .par_iter()
                .filter_map(|id| self.store.get_entity(&descriptor.primary, id))
                .collect()
        } else {
            ordered
                .iter()
                .filter_map(|id| self.store.get_entity(&descriptor.primary, id))
                .collect()
        }
    }

    fn project(&self, entity: &Entity, descriptor: &QueryDescriptor) -> FiberResult<Value> {
        let full = merged_entity_value(entity);

        let include = match &descriptor.include {
            None => return Ok(self.resolve_secure(full, descriptor)?),
            Some(fields) if fields.iter().any(|f| f == "*") => {
                return Ok(self.resolve_secure(full, descriptor)?)
            }
            Some(fields) => fields,
        };

        let mut projected = BTreeMap::new();
        projected.insert("id".to_string(), Value::String(entity.id.clone()));
        for field in include {
            if let Some(value) = full.get(field) {
                projected.insert(field.clone(), value.clone());
            }
        }
        self.resolve_secure(Value::Object(projected), descriptor)
    }

    fn resolve_secure(&self, value: Value, descriptor: &QueryDescriptor) -> FiberResult<Value> {
        let Some(key) = &descriptor.decryption_key else {
            return Ok(value);
        };
        let Value::Object(mut map) = value else {
            return Ok(value);
        };
        if let Some(ciphertext) = map.remove("__secure") {
            let decryptor = self
                .decryptor
                .ok_or_else(|| FiberError::InvalidQuery("decryptionKey set but no decryptor configured".into()))?;
            let plaintext = decryptor.decrypt(&ciphertext, key)?;
            map.insert("__secure".into(), plaintext);
        }
        Ok(Value::Object(map))
    }
}

/// Cooperative cancellation check (spec §5): the engine stops at the next
/// phase boundary and fails with `Timeout` once `deadline` has elapsed.
/// `budget` is echoed back on the error purely for the message; the check
/// itself only depends on `deadline`.
fn check_deadline(deadline: Option<Instant>, budget: Option<Duration>) -> FiberResult<()> {
    if let Some(deadline) = deadline {
        if Instant::now() >= deadline {
            return Err(FiberError::Timeout(budget.unwrap_or_default()));
        }
    }
    Ok(())
}

fn intersect(current: Option<HashSet<String>>, next: HashSet<String>) -> HashSet<String> {
    match current {
        None => next,
        Some(current) => current.intersection(&next).cloned().collect(),
    }
}

fn passes_ttl(entity: &Entity, ttl_days: u32) -> bool {
    let Some(created) = entity.ttl_reference_timestamp() else {
        return true;
    };
    let cutoff = chrono::Utc::now() - chrono::Duration::days(ttl_days as i64);
    created >= cutoff
}

fn parse_conditions(raw: &BTreeMap<String, serde_json::Value>) -> FiberResult<BTreeMap<String, Condition>> {
    let mut out = BTreeMap::new();
    for (field, value) in raw {
        let condition = parse_condition(value)
            .ok_or_else(|| FiberError::InvalidQuery(format!("unknown operator for field {field}")))?;
        out.insert(field.clone(), condition);
    }
    Ok(out)
}

fn matches_filters(entity: &Entity, filters: &BTreeMap<String, Condition>) -> bool {
    filters.iter().all(|(field, condition)| {
        let field_value = entity.attributes.get(field).cloned().unwrap_or(Value::Null);
        condition.matches(&field_value)
    })
}

fn matches_where(entity: &Entity, clauses: &BTreeMap<String, Condition>) -> bool {
    clauses.iter().all(|(path, condition)| {
        let Some((attached, field)) = path.split_once('.') else {
            return false;
        };
        entity
            .documents
            .get(attached)
            .map(|docs| {
                docs.iter().any(|doc| {
                    let field_value = doc.get(field).cloned().unwrap_or(Value::Null);
                    condition.matches(&field_value)
                })
            })
            .unwrap_or(false)
    })
}

fn merged_entity_value(entity: &Entity) -> Value {
    let mut map: BTreeMap<String, Value> = entity.attributes.clone();
    for (name, docs) in &entity.documents {
        map.insert(name.clone(), Value::Array(docs.clone()));
    }
    map.insert("id".to_string(), Value::String(entity.id.clone()));
    Value::Object(map)
}

fn cache_key_for(descriptor: &QueryDescriptor) -> String {
    let filter_json = serde_json::to_string(&descriptor.filter).unwrap_or_default();
    let where_json = serde_json::to_string(&descriptor.where_clause).unwrap_or_default();
    format!(
        "{}|{}|{}|{}|{:?}|{:?}|{}",
        descriptor.primary,
        descriptor.id.as_deref().unwrap_or(""),
        filter_json,
        where_json,
        descriptor.include,
        descriptor.limit,
        descriptor.offset.unwrap_or(0),
    )
}

fn metrics_to_value(metrics: &QueryMetrics) -> Value {
    let mut map = BTreeMap::new();
    map.insert("totalMs".into(), Value::from(metrics.total.as_secs_f64() * 1000.0));
    map.insert(
        "candidateSelectionMs".into(),
        Value::from(metrics.candidate_selection.as_secs_f64() * 1000.0),
    );
    map.insert("loadMs".into(), Value::from(metrics.load.as_secs_f64() * 1000.0));
    map.insert("usedIndex".into(), Value::from(metrics.used_index));
    Value::Object(map)
}
