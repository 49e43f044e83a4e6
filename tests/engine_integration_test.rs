//! End-to-end scenarios exercising the engine façade: insert/read, edge
//! add, nested filter, operator sweep, crash recovery, and graph BFS.

use chrono::Utc;
use fiberdb::config::EngineConfig;
use fiberdb::engine::Engine;
use fiberdb::entity::Entity;
use fiberdb::graph::{Direction, ReturnType, Traversal};
use fiberdb::query::QueryDescriptor;
use fiberdb::value::Value;
use tempfile::tempdir;

fn config_for(dir: &std::path::Path) -> EngineConfig {
    EngineConfig {
        data_path: dir.to_path_buf(),
        ..Default::default()
    }
}

fn customer(id: &str, name: &str, region: &str) -> Entity {
    let mut e = Entity::new("customer", id, Utc::now());
    e.attributes.insert("name".into(), Value::from(name));
    e.attributes.insert("region".into(), Value::from(region));
    e
}

#[test]
fn insert_and_read_round_trip() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(config_for(dir.path())).unwrap();

    engine.save_entity(customer("c1", "Acme", "NW")).unwrap();

    let fetched = engine.get_entity("customer", "c1").unwrap();
    assert_eq!(fetched.attributes.get("name"), Some(&Value::from("Acme")));
}

#[test]
fn edge_add_is_visible_on_the_owning_entity() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(config_for(dir.path())).unwrap();
    engine.save_entity(customer("c1", "Acme", "NW")).unwrap();

    let mut props = std::collections::BTreeMap::new();
    props.insert("department".to_string(), Value::from("IT"));
    engine
        .store()
        .add_relationship("customer", "c1", "EMPLOYS", "user:u1", Some(props))
        .unwrap();

    let fetched = engine.get_entity("customer", "c1").unwrap();
    assert_eq!(fetched.edges.len(), 1);
    assert_eq!(fetched.edges[0].target, "user:u1");
}

#[test]
fn nested_filter_matches_any_matching_document_element() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(config_for(dir.path())).unwrap();

    let mut c1 = customer("c1", "Acme", "NW");
    c1.documents.insert(
        "orders".into(),
        vec![
            Value::from_json(serde_json::json!({"status": "open"})),
            Value::from_json(serde_json::json!({"status": "closed"})),
        ],
    );
    let mut c2 = customer("c2", "Globex", "SE");
    c2.documents.insert(
        "orders".into(),
        vec![Value::from_json(serde_json::json!({"status": "closed"}))],
    );
    engine.save_entity(c1).unwrap();
    engine.save_entity(c2).unwrap();

    let mut descriptor = QueryDescriptor {
        primary: "customer".into(),
        include: Some(vec!["id".into(), "orders".into()]),
        ..Default::default()
    };
    descriptor
        .where_clause
        .insert("orders.status".into(), serde_json::json!("open"));

    let result = engine.query(descriptor).unwrap();
    assert_eq!(result.rows.len(), 1);
    let Value::Object(row) = &result.rows[0].value else {
        panic!("expected object row");
    };
    assert_eq!(row.get("id"), Some(&Value::from("c1")));
}

#[test]
fn operator_sweep_returns_entities_strictly_greater_than_threshold() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(config_for(dir.path())).unwrap();

    for (id, revenue) in [("c1", 500.0), ("c2", 1500.0), ("c3", 2500.0)] {
        let mut e = Entity::new("customer", id, Utc::now());
        e.attributes.insert("revenue".into(), Value::from(revenue));
        engine.save_entity(e).unwrap();
    }

    let mut descriptor = QueryDescriptor {
        primary: "customer".into(),
        ..Default::default()
    };
    descriptor.filter.insert("revenue".into(), serde_json::json!({"gt": 1000}));

    let result = engine.query(descriptor).unwrap();
    assert_eq!(result.rows.len(), 2);
}

#[test]
fn crash_recovery_replays_entities_written_before_and_after_compaction() {
    let dir = tempdir().unwrap();

    {
        let mut config = config_for(dir.path());
        config.compaction_threshold = 3;
        let engine = Engine::open(config).unwrap();
        for i in 0..5 {
            engine
                .save_entity(Entity::new("customer", format!("c{i}"), Utc::now()))
                .unwrap();
        }
    }

    {
        let mut config = config_for(dir.path());
        config.compaction_threshold = 3;
        let engine = Engine::open(config).unwrap();
        for i in 0..5 {
            assert!(engine.get_entity("customer", &format!("c{i}")).is_some());
        }

        for i in 5..10 {
            engine
                .save_entity(Entity::new("customer", format!("c{i}"), Utc::now()))
                .unwrap();
        }
    }

    let mut config = config_for(dir.path());
    config.compaction_threshold = 3;
    let engine = Engine::open(config).unwrap();
    for i in 0..10 {
        assert!(engine.get_entity("customer", &format!("c{i}")).is_some());
    }
    assert_eq!(engine.store().stats().total_entities, 10);
}

#[test]
fn graph_bfs_finds_only_the_shortest_path() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(config_for(dir.path())).unwrap();

    engine.save_entity(Entity::new("customer", "c1", Utc::now())).unwrap();
    engine.save_entity(Entity::new("user", "u1", Utc::now())).unwrap();
    engine.save_entity(Entity::new("product", "p1", Utc::now())).unwrap();

    engine
        .store()
        .add_relationship("customer", "c1", "EMPLOYS", "user:u1", None)
        .unwrap();
    engine
        .store()
        .add_relationship("user", "u1", "USES", "product:p1", None)
        .unwrap();
    engine
        .store()
        .add_relationship("customer", "c1", "PURCHASED", "product:p1", None)
        .unwrap();

    let paths = engine.find_path("customer:c1", "product:p1", 3);
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].nodes, vec!["customer:c1", "product:p1"]);

    let traversal = Traversal {
        direction: Some(Direction::Out),
        max_depth: 2,
        ..Default::default()
    };
    let reachable = engine.query_graph(&["customer:c1".to_string()], &traversal, ReturnType::Nodes);
    assert!(reachable.nodes.contains(&"product:p1".to_string()));
    assert!(reachable.nodes.contains(&"user:u1".to_string()));
}
