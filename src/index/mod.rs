//! Index manager: builds and maintains hash/range/text indexes over primary
//! or nested document fields, tracks usage statistics, and answers
//! query-planner lookups.
//!
//! Redesign flag (spec §9, "index polymorphism"): hash/range/text share
//! only the query interface, so they are modeled as three concrete types
//! behind a common `IndexHandle` sum type rather than a trait object —
//! generalized from the teacher's spatial-index-vs-posting-list split in
//! `database/spatial_index.rs` (there: R-tree vs octree; here: hash vs
//! range vs text).

pub mod hash_index;
pub mod range_index;
pub mod text_index;

use crate::entity::Entity;
use crate::predicate::Condition;
use crate::value::Value;
use hash_index::HashIndex;
use parking_lot::RwLock;
use range_index::RangeIndex;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Which kind of index a definition describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// `value -> set<entityId>`.
    Hash,
    /// Ordered, supports range comparisons.
    Range,
    /// Tokenized inverted index.
    Text,
}

/// Per-index construction options (spec §3 "Index definition").
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Reject inserts that would duplicate an existing key (hash indexes
    /// only; advisory elsewhere).
    pub is_unique: bool,
    /// Skip entities whose field value is null/absent.
    pub ignore_null: bool,
    /// Case-sensitive comparisons (hash eq and text contains).
    pub is_case_sensitive: bool,
}

/// `{id, name, entityType, attachedType?, field, kind, options}` (spec §3).
#[derive(Debug, Clone)]
pub struct IndexDefinition {
    /// Unique index id, assigned at creation.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Entity type this index applies to.
    pub entity_type: String,
    /// When set, this index is over elements of the named document array
    /// rather than primary attributes.
    pub attached_type: Option<String>,
    /// Field name within the primary attributes or each attached element.
    pub field: String,
    /// Index kind.
    pub kind: IndexKind,
    /// Construction options.
    pub options: IndexOptions,
}

/// Cumulative usage statistics for one index.
#[derive(Debug, Clone, Default)]
pub struct IndexUsageStats {
    /// Number of times this index answered a lookup.
    pub hits: u64,
    /// Sum of lookup durations.
    pub total_lookup_time: Duration,
}

impl IndexUsageStats {
    /// `total_lookup_time / hits`, zero if never hit.
    pub fn average_lookup_time(&self) -> Duration {
        if self.hits == 0 {
            Duration::ZERO
        } else {
            self.total_lookup_time / self.hits as u32
        }
    }
}

enum IndexStorage {
    Hash(HashIndex),
    Range(RangeIndex),
    Text(text_index::TextIndex),
}

struct ManagedIndex {
    def: IndexDefinition,
    storage: IndexStorage,
    stats: RwLock<IndexUsageStats>,
}

/// Result of a successful [`IndexManager::find_and_query`] call.
#[derive(Debug, Clone)]
pub struct IndexQueryResult {
    /// Id of the index that answered the lookup.
    pub index_used: String,
    /// Kind of index that answered the lookup.
    pub index_type: IndexKind,
    /// Matching entity ids.
    pub matched_ids: HashSet<String>,
    /// How long the lookup took.
    pub lookup_time: Duration,
}

/// Owns every registered index and dispatches lookups/maintenance.
pub struct IndexManager {
    indexes: RwLock<Vec<ManagedIndex>>,
}

impl IndexManager {
    /// Build an index manager with no indexes registered.
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(Vec::new()),
        }
    }

    fn register(
        &self,
        entity_type: &str,
        attached_type: Option<&str>,
        field: &str,
        kind: IndexKind,
        options: IndexOptions,
        storage: IndexStorage,
        entities: impl Iterator<Item = (String, Entity)>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let def = IndexDefinition {
            id: id.clone(),
            name: format!("{entity_type}.{field}"),
            entity_type: entity_type.to_string(),
            attached_type: attached_type.map(str::to_string),
            field: field.to_string(),
            kind,
            options,
        };
        let managed = ManagedIndex {
            def,
            storage,
            stats: RwLock::new(IndexUsageStats::default()),
        };

        for (_, entity) in entities {
            if entity.entity_type != entity_type {
                continue;
            }
            index_entity(&managed, &entity);
        }

        self.indexes.write().push(managed);
        id
    }

    /// Scan `entities` to populate a new hash index over `entity_type.field`
    /// (or each attached element's field, if `attached_type` is set), then
    /// register it for incremental maintenance.
    pub fn create_hash_index(
        &self,
        entity_type: &str,
        field: &str,
        attached_type: Option<&str>,
        options: IndexOptions,
        entities: impl Iterator<Item = (String, Entity)>,
    ) -> String {
        let storage = IndexStorage::Hash(HashIndex::new(options.is_case_sensitive));
        self.register(entity_type, attached_type, field, IndexKind::Hash, options, storage, entities)
    }

    /// Same as [`IndexManager::create_hash_index`] for a range index.
    pub fn create_range_index(
        &self,
        entity_type: &str,
        field: &str,
        attached_type: Option<&str>,
        options: IndexOptions,
        entities: impl Iterator<Item = (String, Entity)>,
    ) -> String {
        let storage = IndexStorage::Range(RangeIndex::new());
        self.register(entity_type, attached_type, field, IndexKind::Range, options, storage, entities)
    }

    /// Same as [`IndexManager::create_hash_index`] for a text index.
    pub fn create_text_index(
        &self,
        entity_type: &str,
        field: &str,
        attached_type: Option<&str>,
        options: IndexOptions,
        entities: impl Iterator<Item = (String, Entity)>,
    ) -> String {
        let storage = IndexStorage::Text(text_index::TextIndex::new(options.is_case_sensitive));
        self.register(entity_type, attached_type, field, IndexKind::Text, options, storage, entities)
    }

    /// All registered index definitions.
    pub fn list_indexes(&self) -> Vec<IndexDefinition> {
        self.indexes.read().iter().map(|m| m.def.clone()).collect()
    }

    /// `(index_id, stats)` for every registered index.
    pub fn get_index_stats(&self) -> Vec<(String, IndexUsageStats)> {
        self.indexes
            .read()
            .iter()
            .map(|m| (m.def.id.clone(), m.stats.read().clone()))
            .collect()
    }

    /// Answer a lookup for `entity_type.field` (or `attached_type.field`)
    /// under `condition` using a matching registered index, or `None` if no
    /// index applies (the query engine then falls back to a full scan).
    pub fn find_and_query(
        &self,
        entity_type: &str,
        field: &str,
        attached_type: Option<&str>,
        condition: &Condition,
    ) -> Option<IndexQueryResult> {
        let indexes = self.indexes.read();
        let managed = indexes.iter().find(|m| {
            m.def.entity_type == entity_type
                && m.def.field == field
                && m.def.attached_type.as_deref() == attached_type
        })?;

        let start = Instant::now();
        let matched_ids = apply_condition(&managed.storage, condition)?;
        let lookup_time = start.elapsed();

        let mut stats = managed.stats.write();
        stats.hits += 1;
        stats.total_lookup_time += lookup_time;

        Some(IndexQueryResult {
            index_used: managed.def.id.clone(),
            index_type: managed.def.kind,
            matched_ids,
            lookup_time,
        })
    }

    /// Incremental maintenance: for every registered index whose
    /// `(entityType, attachedType?, field)` is affected by `entity`, remove
    /// stale postings for its id and insert fresh ones. Idempotent — safe
    /// to call again with the same entity state.
    pub fn on_entity_write(&self, entity: &Entity) {
        let indexes = self.indexes.read();
        for managed in indexes.iter() {
            if managed.def.entity_type != entity.entity_type {
                continue;
            }
            remove_entity(&managed.storage, &entity.id);
            index_entity(managed, entity);
        }
    }

    /// Incremental maintenance on delete: purge the entity id from every
    /// index registered for its type.
    pub fn on_entity_delete(&self, entity_type: &str, entity_id: &str) {
        let indexes = self.indexes.read();
        for managed in indexes.iter() {
            if managed.def.entity_type == entity_type {
                remove_entity(&managed.storage, entity_id);
            }
        }
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}

fn field_values<'a>(def: &IndexDefinition, entity: &'a Entity) -> Vec<&'a Value> {
    match &def.attached_type {
        None => entity.attributes.get(&def.field).into_iter().collect(),
        Some(attached) => entity
            .documents
            .get(attached)
            .map(|docs| {
                docs.iter()
                    .filter_map(|doc| doc.get(&def.field))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn index_entity(managed: &ManagedIndex, entity: &Entity) {
    for value in field_values(&managed.def, entity) {
        if managed.def.options.ignore_null && value.is_null() {
            continue;
        }
        match &managed.storage {
            IndexStorage::Hash(idx) => idx.insert(value, &entity.id),
            IndexStorage::Range(idx) => idx.insert(value, &entity.id),
            IndexStorage::Text(idx) => idx.insert(value, &entity.id),
        }
    }
}

fn remove_entity(storage: &IndexStorage, entity_id: &str) {
    match storage {
        IndexStorage::Hash(idx) => idx.remove_all(entity_id),
        IndexStorage::Range(idx) => idx.remove_all(entity_id),
        IndexStorage::Text(idx) => idx.remove_all(entity_id),
    }
}

fn apply_condition(storage: &IndexStorage, condition: &Condition) -> Option<HashSet<String>> {
    use crate::predicate::Operator;
    match (storage, condition.op) {
        (IndexStorage::Hash(idx), Operator::Eq) => Some(idx.eq(&condition.value)),
        (IndexStorage::Hash(idx), Operator::Ne) => Some(idx.ne(&condition.value)),
        (IndexStorage::Hash(idx), Operator::In) => match &condition.value {
            Value::Array(items) => Some(idx.in_set(items)),
            _ => None,
        },
        (IndexStorage::Range(idx), Operator::Eq) => Some(idx.eq(&condition.value)),
        (IndexStorage::Range(idx), Operator::Gt) => Some(idx.gt(&condition.value)),
        (IndexStorage::Range(idx), Operator::Lt) => Some(idx.lt(&condition.value)),
        (IndexStorage::Text(idx), Operator::Contains) => {
            let needle = condition.value.as_str()?;
            idx.contains(needle)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Condition;
    use chrono::Utc;

    fn customer(id: &str, revenue: f64) -> Entity {
        let mut e = Entity::new("customer", id, Utc::now());
        e.attributes.insert("revenue".into(), Value::from(revenue));
        e
    }

    #[test]
    fn hash_index_answers_eq_lookup() {
        let mgr = IndexManager::new();
        let entities = vec![
            ("customer:c1".to_string(), customer("c1", 500.0)),
            ("customer:c2".to_string(), customer("c2", 1500.0)),
        ];
        mgr.create_hash_index("customer", "revenue", None, IndexOptions::default(), entities.into_iter());

        let cond = Condition::eq(Value::from(500.0));
        let result = mgr.find_and_query("customer", "revenue", None, &cond).unwrap();
        assert_eq!(result.matched_ids, HashSet::from(["c1".to_string()]));
    }

    #[test]
    fn range_index_answers_gt_lookup_after_incremental_write() {
        let mgr = IndexManager::new();
        mgr.create_range_index("customer", "revenue", None, IndexOptions::default(), std::iter::empty());

        let c1 = customer("c1", 500.0);
        let c2 = customer("c2", 2500.0);
        mgr.on_entity_write(&c1);
        mgr.on_entity_write(&c2);

        let cond = Condition {
            op: crate::predicate::Operator::Gt,
            value: Value::from(1000.0),
        };
        let result = mgr.find_and_query("customer", "revenue", None, &cond).unwrap();
        assert_eq!(result.matched_ids, HashSet::from(["c2".to_string()]));
    }

    #[test]
    fn no_matching_index_returns_none() {
        let mgr = IndexManager::new();
        let cond = Condition::eq(Value::from("x"));
        assert!(mgr.find_and_query("customer", "unindexed", None, &cond).is_none());
    }

    #[test]
    fn delete_purges_entity_from_every_registered_index() {
        let mgr = IndexManager::new();
        let c1 = customer("c1", 500.0);
        mgr.create_hash_index(
            "customer",
            "revenue",
            None,
            IndexOptions::default(),
            vec![("customer:c1".to_string(), c1)].into_iter(),
        );
        mgr.on_entity_delete("customer", "c1");
        let cond = Condition::eq(Value::from(500.0));
        let result = mgr.find_and_query("customer", "revenue", None, &cond).unwrap();
        assert!(result.matched_ids.is_empty());
    }
}
