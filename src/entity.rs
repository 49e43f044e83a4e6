//! Entity and edge types — the data model shared by every component.

use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Composite key `(type, id)` identifying an entity.
pub type EntityKey = (String, String);

/// Render a `(type, id)` pair as the canonical `"type:id"` string used for
/// WAL snapshot keys, edge targets, and graph node identifiers.
pub fn key_string(entity_type: &str, id: &str) -> String {
    format!("{entity_type}:{id}")
}

/// Split a canonical `"type:id"` string back into its parts.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
}

/// `{created, updated}` timestamps plus the monotonically increasing
/// version counter and schema version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityMetadata {
    /// ISO-8601 creation timestamp.
    pub created: DateTime<Utc>,
    /// ISO-8601 timestamp of the most recent mutation.
    pub updated: DateTime<Utc>,
    /// Strictly increasing per `(type, id)`.
    pub version: u64,
    /// Schema version for the attribute shape, opaque to the engine.
    pub schema_version: u32,
    /// Optional free-form tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashSet<String>>,
}

impl EntityMetadata {
    /// Build metadata for a brand-new entity (`version = 0`).
    pub fn new(now: DateTime<Utc>, schema_version: u32) -> Self {
        Self {
            created: now,
            updated: now,
            version: 0,
            schema_version,
            tags: None,
        }
    }
}

/// A directed, typed, property-bearing edge stored inside the source
/// entity. `target` is the canonical `"type:id"` string; the referenced
/// entity is not required to exist (dangling edges are permitted — see
/// DESIGN.md's orphan-edge policy decision).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    /// Unique within the owning entity.
    pub id: String,
    /// Free-form relation label, e.g. `EMPLOYS`, `PURCHASED`.
    pub edge_type: String,
    /// `"<type>:<id>"` of the target entity.
    pub target: String,
    /// Optional edge properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Value>>,
}

impl Edge {
    /// Parse `target` into `(type, id)`, if it is well-formed.
    pub fn target_key(&self) -> Option<(&str, &str)> {
        split_key(&self.target)
    }
}

/// A rich entity: typed attributes, nested document collections, outgoing
/// edges, and metadata. Uniquely identified by `(entity_type, id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    /// Entity type, e.g. `"customer"`.
    pub entity_type: String,
    /// Entity id, unique within `entity_type`.
    pub id: String,
    /// Primary attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Named document-collection attachments, each an ordered array of
    /// JSON objects.
    #[serde(default)]
    pub documents: BTreeMap<String, Vec<Value>>,
    /// Outgoing edges, in insertion order.
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Lifecycle metadata.
    pub metadata: EntityMetadata,
}

impl Entity {
    /// Construct a new entity with empty documents/edges and `version = 0`.
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            attributes: BTreeMap::new(),
            documents: BTreeMap::new(),
            edges: Vec::new(),
            metadata: EntityMetadata::new(now, 1),
        }
    }

    /// The `(type, id)` key for this entity.
    pub fn key(&self) -> EntityKey {
        (self.entity_type.clone(), self.id.clone())
    }

    /// The canonical `"type:id"` string for this entity.
    pub fn canonical_key(&self) -> String {
        key_string(&self.entity_type, &self.id)
    }

    /// Look up a document-collection field value for a single document
    /// element, used by the index manager and nested-filter evaluation.
    pub fn document_field<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
        doc.get(field)
    }

    /// Remove an edge with the given id from this entity, returning it if
    /// present.
    pub fn remove_edge(&mut self, edge_id: &str) -> Option<Edge> {
        let pos = self.edges.iter().position(|e| e.id == edge_id)?;
        Some(self.edges.remove(pos))
    }

    /// Insert or replace an edge by id (ADD_EDGE semantics during replay:
    /// remove any edge with the same id, then push the new one).
    pub fn upsert_edge(&mut self, edge: Edge) {
        self.edges.retain(|e| e.id != edge.id);
        self.edges.push(edge);
    }

    /// Effective creation timestamp used for TTL filtering: prefers
    /// `attributes.created_at`/`attributes.createdAt` when present and
    /// parseable as RFC 3339 (per spec §4.5 step 4). Returns `None` when
    /// neither attribute is present, which the TTL filter treats as "no
    /// constraint, entity passes."
    pub fn ttl_reference_timestamp(&self) -> Option<DateTime<Utc>> {
        for key in ["created_at", "createdAt"] {
            if let Some(Value::String(s)) = self.attributes.get(key) {
                if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                    return Some(ts.with_timezone(&Utc));
                }
            }
        }
        None
    }
}
