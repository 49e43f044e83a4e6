//! Legacy migrator: reads the `anchors/<type>/<id>.json` +
//! `attached/<id>/<attached>.json` file layout and writes equivalent
//! entities through the WAL (spec §6 "Migrator").
//!
//! Grounded on the teacher's `MigrationRunner` in
//! `database/migrations.rs`: a one-shot, idempotent-by-id sweep that reports
//! a per-item outcome list rather than aborting on the first failure.

use crate::entity::{Edge, Entity};
use crate::error::FiberResult;
use crate::store::EntityStore;
use crate::value::Value;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Outcome of migrating one legacy anchor file.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    /// `"<type>:<id>"` of the migrated entity.
    pub key: String,
    /// `Ok` unless the anchor or an attached file failed to parse.
    pub result: Result<(), String>,
}

/// Summary of a full migration run.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// Per-anchor outcomes, in directory-iteration order.
    pub outcomes: Vec<MigrationOutcome>,
}

impl MigrationReport {
    /// Count of anchors that migrated successfully.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Count of anchors that failed to migrate.
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }
}

/// Migrate every `anchors/<type>/<id>.json` file under `legacy_root` into
/// `store`, pulling in `attached/<id>/<attached>.json` document
/// collections and inferring edges from attribute keys ending in `Id` or
/// `Ids` that resolve to another anchor directory.
pub fn migrate(store: &EntityStore, legacy_root: impl AsRef<Path>) -> FiberResult<MigrationReport> {
    let legacy_root = legacy_root.as_ref();
    let anchors_dir = legacy_root.join("anchors");
    let attached_dir = legacy_root.join("attached");
    let mut report = MigrationReport::default();

    if !anchors_dir.is_dir() {
        return Ok(report);
    }

    let known_types = list_dir_names(&anchors_dir);

    for entity_type in &known_types {
        let type_dir = anchors_dir.join(entity_type);
        for id in list_json_stems(&type_dir) {
            let key = format!("{entity_type}:{id}");
            let outcome = migrate_one(store, &type_dir, &attached_dir, entity_type, &id, &known_types);
            report.outcomes.push(MigrationOutcome {
                key,
                result: outcome,
            });
        }
    }

    Ok(report)
}

fn migrate_one(
    store: &EntityStore,
    type_dir: &Path,
    attached_dir: &Path,
    entity_type: &str,
    id: &str,
    known_types: &[String],
) -> Result<(), String> {
    let anchor_path = type_dir.join(format!("{id}.json"));
    let raw = std::fs::read_to_string(&anchor_path).map_err(|e| e.to_string())?;
    let json: serde_json::Value = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
    let attributes = match Value::from_json(json) {
        Value::Object(map) => map,
        _ => BTreeMap::new(),
    };

    let mut entity = Entity::new(entity_type, id, Utc::now());
    entity.edges = infer_edges(&attributes, known_types);
    entity.attributes = attributes;
    entity.documents = load_attached(attached_dir, id)?;

    store.save_entity(entity).map_err(|e| e.to_string())?;
    Ok(())
}

fn infer_edges(attributes: &BTreeMap<String, Value>, known_types: &[String]) -> Vec<Edge> {
    let mut edges = Vec::new();
    for (field, value) in attributes {
        let Some(referenced_type) = referenced_type(field, known_types) else {
            continue;
        };
        match value {
            Value::String(target_id) => {
                edges.push(Edge {
                    id: Uuid::new_v4().to_string(),
                    edge_type: field.clone(),
                    target: format!("{referenced_type}:{target_id}"),
                    properties: None,
                });
            }
            Value::Array(items) => {
                for item in items {
                    if let Value::String(target_id) = item {
                        edges.push(Edge {
                            id: Uuid::new_v4().to_string(),
                            edge_type: field.clone(),
                            target: format!("{referenced_type}:{target_id}"),
                            properties: None,
                        });
                    }
                }
            }
            _ => {}
        }
    }
    edges
}

/// `fooId` or `fooIds` infers type `foo` when `foo` (or its plural "foos")
/// is a known anchor directory name.
fn referenced_type(field: &str, known_types: &[String]) -> Option<String> {
    let base = field.strip_suffix("Ids").or_else(|| field.strip_suffix("Id"))?;
    let candidate = base.to_string();
    if known_types.iter().any(|t| t == &candidate) {
        return Some(candidate);
    }
    let plural = format!("{candidate}s");
    if known_types.iter().any(|t| t == &plural) {
        return Some(plural);
    }
    None
}

fn load_attached(attached_dir: &Path, id: &str) -> Result<BTreeMap<String, Vec<Value>>, String> {
    let mut documents = BTreeMap::new();
    let id_dir = attached_dir.join(id);
    if !id_dir.is_dir() {
        return Ok(documents);
    }

    for entry in std::fs::read_dir(&id_dir).map_err(|e| e.to_string())? {
        let entry = entry.map_err(|e| e.to_string())?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let raw = std::fs::read_to_string(&path).map_err(|e| e.to_string())?;
        let json: serde_json::Value = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
        let docs = match Value::from_json(json) {
            Value::Array(items) => items,
            other => vec![other],
        };
        documents.insert(name.to_string(), docs);
    }

    Ok(documents)
}

fn list_dir_names(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().to_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn list_json_stems(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
                .filter_map(|e| e.path().file_stem().and_then(|s| s.to_str()).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTier;
    use crate::index::IndexManager;
    use crate::wal::Wal;
    use std::time::Duration;
    use tempfile::tempdir;

    fn write_json(path: &Path, value: serde_json::Value) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_string(&value).unwrap()).unwrap();
    }

    #[test]
    fn migrates_anchor_with_attached_docs_and_inferred_edge() {
        let legacy = tempdir().unwrap();
        write_json(
            &legacy.path().join("anchors/customer/c1.json"),
            serde_json::json!({"name": "Acme", "accountManagerId": "u1"}),
        );
        write_json(&legacy.path().join("anchors/user/u1.json"), serde_json::json!({"name": "Pat"}));
        write_json(
            &legacy.path().join("attached/c1/orders.json"),
            serde_json::json!([{"status": "shipped"}]),
        );

        let data_dir = tempdir().unwrap();
        let wal = Wal::open(data_dir.path(), 1_000, true).unwrap();
        let cache = CacheTier::new(100, Duration::from_secs(5));
        let index = IndexManager::new();
        let store = EntityStore::open(wal, cache, index, true).unwrap();

        let report = migrate(&store, legacy.path()).unwrap();
        assert_eq!(report.succeeded(), 2);

        let customer = store.get_entity("customer", "c1").unwrap();
        assert_eq!(customer.attributes.get("name"), Some(&Value::from("Acme")));
        assert_eq!(customer.edges.len(), 1);
        assert_eq!(customer.edges[0].target, "user:u1");
        assert_eq!(customer.documents.get("orders").map(|d| d.len()), Some(1));
    }

    #[test]
    fn missing_legacy_root_yields_empty_report() {
        let data_dir = tempdir().unwrap();
        let wal = Wal::open(data_dir.path(), 1_000, true).unwrap();
        let cache = CacheTier::new(100, Duration::from_secs(5));
        let index = IndexManager::new();
        let store = EntityStore::open(wal, cache, index, true).unwrap();

        let report = migrate(&store, "/nonexistent/legacy/path").unwrap();
        assert_eq!(report.outcomes.len(), 0);
    }
}
