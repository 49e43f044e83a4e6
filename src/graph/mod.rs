//! Graph layer: breadth-first traversal and shortest-path search over the
//! edges embedded in entities.
//!
//! Grounded on the teacher's `SpatialIndex` incremental-rebuild pattern in
//! `database/spatial_index.rs` for the inverted (IN-direction) edge map,
//! and on `enterprise/eventsource/projection.rs`'s "rebuild on load,
//! maintain incrementally thereafter" lifecycle.

use crate::entity::{key_string, split_key, Edge};
use crate::predicate::Condition;
use crate::store::EntityStore;
use crate::value::Value;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Which edge direction to follow during traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow outgoing edges only.
    Out,
    /// Follow incoming edges only (requires the inverted edge map).
    In,
    /// Follow both directions.
    Both,
}

/// What shape of result `query_graph` should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    /// Visited node keys only.
    Nodes,
    /// Traversed edges only.
    Edges,
    /// Full paths from a start node to each visited node.
    Paths,
}

/// `{direction, maxDepth, edgeTypes?, nodeFilter?, edgeFilter?}`.
#[derive(Debug, Clone, Default)]
pub struct Traversal {
    /// Edge direction to follow.
    pub direction: Option<Direction>,
    /// Maximum BFS depth from any start node.
    pub max_depth: usize,
    /// Restrict traversal to these edge types, if set.
    pub edge_types: Option<HashSet<String>>,
    /// Restrict target nodes by type and attribute predicates.
    pub node_filter: Option<NodeFilter>,
    /// Restrict edges by exact-match properties.
    pub edge_filter: Option<EdgeFilter>,
}

/// Restricts which target nodes a traversal may visit.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Required entity type, if set.
    pub entity_type: Option<String>,
    /// Attribute predicates the node's attributes must satisfy.
    pub attributes: BTreeMap<String, Condition>,
}

/// Restricts which edges a traversal may follow.
#[derive(Debug, Clone, Default)]
pub struct EdgeFilter {
    /// Exact-match properties required on the edge.
    pub properties: BTreeMap<String, Value>,
}

/// A reference to one traversed edge, tagged with its direction relative
/// to the node it was followed from.
#[derive(Debug, Clone)]
pub struct EdgeRef {
    /// Source node key.
    pub from: String,
    /// Target node key.
    pub to: String,
    /// The edge itself.
    pub edge: Edge,
}

/// `{nodes, edges}` — a simple path from a start node to a visited node.
#[derive(Debug, Clone, Default)]
pub struct Path {
    /// Node keys along the path, start to end inclusive.
    pub nodes: Vec<String>,
    /// Edges traversed, in order.
    pub edges: Vec<EdgeRef>,
}

/// Result of [`GraphEngine::query_graph`].
#[derive(Debug, Clone, Default)]
pub struct GraphResult {
    /// Visited node keys, present for every `ReturnType`.
    pub nodes: Vec<String>,
    /// Traversed edges, populated for `ReturnType::Edges`.
    pub edges: Vec<EdgeRef>,
    /// Paths from a start node to each visited node, populated for
    /// `ReturnType::Paths`.
    pub paths: Vec<Path>,
}

/// Maintains an inverted (target -> incoming edges) index alongside the
/// entity store and answers BFS/shortest-path queries.
pub struct GraphEngine<'a> {
    store: &'a EntityStore,
    inverted: DashMap<String, Vec<EdgeRef>>,
}

impl<'a> GraphEngine<'a> {
    /// Build a graph engine over `store`, rebuilding the inverted edge map
    /// from current entity state.
    pub fn new(store: &'a EntityStore) -> Self {
        let engine = Self {
            store,
            inverted: DashMap::new(),
        };
        engine.rebuild_inverted_index();
        engine
    }

    fn rebuild_inverted_index(&self) {
        self.inverted.clear();
        for entity in self.store.snapshot_entities() {
            let from = entity.canonical_key();
            for edge in &entity.edges {
                self.inverted
                    .entry(edge.target.clone())
                    .or_default()
                    .push(EdgeRef {
                        from: from.clone(),
                        to: edge.target.clone(),
                        edge: edge.clone(),
                    });
            }
        }
    }

    /// Incrementally record a newly added edge in the inverted index. The
    /// store calls nothing here directly; callers that add edges through
    /// paths other than the store should invoke this to keep `IN`
    /// traversal consistent. FiberDB currently rebuilds on each
    /// `GraphEngine::new` rather than wiring a live hook, since the engine
    /// is constructed per-query from the latest store state.
    pub fn record_edge(&self, from: &str, edge: Edge) {
        self.inverted
            .entry(edge.target.clone())
            .or_default()
            .push(EdgeRef {
                from: from.to_string(),
                to: edge.target.clone(),
                edge,
            });
    }

    fn outgoing(&self, node_key: &str) -> Vec<EdgeRef> {
        let Some((entity_type, id)) = split_key(node_key) else {
            return Vec::new();
        };
        let Some(entity) = self.store.get_entity(entity_type, id) else {
            return Vec::new();
        };
        entity
            .edges
            .iter()
            .map(|edge| EdgeRef {
                from: node_key.to_string(),
                to: edge.target.clone(),
                edge: edge.clone(),
            })
            .collect()
    }

    fn incoming(&self, node_key: &str) -> Vec<EdgeRef> {
        self.inverted.get(node_key).map(|v| v.clone()).unwrap_or_default()
    }

    fn neighbors(&self, node_key: &str, direction: Direction) -> Vec<EdgeRef> {
        match direction {
            Direction::Out => self.outgoing(node_key),
            Direction::In => self.incoming(node_key),
            Direction::Both => {
                let mut both = self.outgoing(node_key);
                both.extend(self.incoming(node_key));
                both
            }
        }
    }

    fn edge_passes(&self, edge_ref: &EdgeRef, traversal: &Traversal) -> bool {
        if let Some(types) = &traversal.edge_types {
            if !types.contains(&edge_ref.edge.edge_type) {
                return false;
            }
        }
        if let Some(edge_filter) = &traversal.edge_filter {
            let props = edge_ref.edge.properties.clone().unwrap_or_default();
            for (key, expected) in &edge_filter.properties {
                if props.get(key) != Some(expected) {
                    return false;
                }
            }
        }
        true
    }

    fn node_passes(&self, node_key: &str, traversal: &Traversal) -> bool {
        let Some(filter) = &traversal.node_filter else {
            return true;
        };
        let Some((entity_type, id)) = split_key(node_key) else {
            return false;
        };
        if let Some(expected_type) = &filter.entity_type {
            if expected_type != entity_type {
                return false;
            }
        }
        let Some(entity) = self.store.get_entity(entity_type, id) else {
            return false;
        };
        filter.attributes.iter().all(|(field, condition)| {
            let field_value = entity.attributes.get(field).cloned().unwrap_or(Value::Null);
            condition.matches(&field_value)
        })
    }

    /// Breadth-first traversal from `start_nodes`, visiting each node at
    /// its shallowest depth only.
    pub fn query_graph(
        &self,
        start_nodes: &[String],
        traversal: &Traversal,
        return_type: ReturnType,
    ) -> GraphResult {
        let direction = traversal.direction.unwrap_or(Direction::Out);
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        let mut traversed_edges: Vec<EdgeRef> = Vec::new();
        let mut predecessor: BTreeMap<String, (String, EdgeRef)> = BTreeMap::new();

        for start in start_nodes {
            if visited.insert(start.clone()) {
                queue.push_back((start.clone(), 0));
            }
        }

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= traversal.max_depth {
                continue;
            }
            for edge_ref in self.neighbors(&node, direction) {
                if !self.edge_passes(&edge_ref, traversal) {
                    continue;
                }
                let next = if edge_ref.from == node { edge_ref.to.clone() } else { edge_ref.from.clone() };
                if !self.node_passes(&next, traversal) {
                    continue;
                }
                traversed_edges.push(edge_ref.clone());
                if visited.insert(next.clone()) {
                    predecessor.insert(next.clone(), (node.clone(), edge_ref));
                    queue.push_back((next, depth + 1));
                }
            }
        }

        let mut nodes: Vec<String> = visited.into_iter().collect();
        nodes.sort();

        let paths = if return_type == ReturnType::Paths {
            nodes
                .iter()
                .map(|node| build_path(node, &predecessor, start_nodes))
                .collect()
        } else {
            Vec::new()
        };

        GraphResult {
            nodes,
            edges: if return_type == ReturnType::Edges { traversed_edges } else { Vec::new() },
            paths,
        }
    }

    /// All shortest simple paths of length <= `max_depth` from `from` to
    /// `to`. BFS explores level by level; once `to` is first reached at
    /// depth `d`, every path recorded at that depth is returned (paths
    /// longer than the first successful depth are not enumerated).
    pub fn find_path(&self, from: &str, to: &str, max_depth: usize) -> Vec<Path> {
        if from == to {
            return vec![Path {
                nodes: vec![from.to_string()],
                edges: vec![],
            }];
        }

        let mut frontier: Vec<Path> = vec![Path {
            nodes: vec![from.to_string()],
            edges: vec![],
        }];
        let mut visited: HashSet<String> = HashSet::from([from.to_string()]);

        for _depth in 0..max_depth {
            let mut next_frontier = Vec::new();
            let mut found = Vec::new();
            let mut newly_visited = HashSet::new();

            for path in &frontier {
                let tail = path.nodes.last().unwrap().clone();
                for edge_ref in self.neighbors(&tail, Direction::Out) {
                    if visited.contains(&edge_ref.to) && edge_ref.to != to {
                        continue;
                    }
                    let mut extended = path.clone();
                    extended.nodes.push(edge_ref.to.clone());
                    extended.edges.push(edge_ref.clone());

                    if edge_ref.to == to {
                        found.push(extended);
                    } else {
                        newly_visited.insert(edge_ref.to.clone());
                        next_frontier.push(extended);
                    }
                }
            }

            if !found.is_empty() {
                return found;
            }
            visited.extend(newly_visited);
            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }

        Vec::new()
    }
}

fn build_path(
    target: &str,
    predecessor: &BTreeMap<String, (String, EdgeRef)>,
    start_nodes: &[String],
) -> Path {
    let mut nodes = vec![target.to_string()];
    let mut edges = Vec::new();
    let mut current = target.to_string();

    while let Some((prev, edge_ref)) = predecessor.get(&current) {
        nodes.push(prev.clone());
        edges.push(edge_ref.clone());
        current = prev.clone();
        if start_nodes.contains(&current) {
            break;
        }
    }

    nodes.reverse();
    edges.reverse();
    Path { nodes, edges }
}

/// Build the canonical `"type:id"` key for a start node, used by callers
/// assembling `startNodes` from typed ids.
pub fn node_key(entity_type: &str, id: &str) -> String {
    key_string(entity_type, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTier;
    use crate::entity::Entity;
    use crate::index::IndexManager;
    use crate::wal::Wal;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn store_with_chain() -> EntityStore {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path(), 1_000, true).unwrap();
        let cache = CacheTier::new(100, Duration::from_secs(5));
        let index = IndexManager::new();
        let store = EntityStore::open(wal, cache, index, true).unwrap();
        std::mem::forget(dir);

        for id in ["a", "b", "c"] {
            store.save_entity(Entity::new("node", id, Utc::now())).unwrap();
        }
        store.add_relationship("node", "a", "LINK", "node:b", None).unwrap();
        store.add_relationship("node", "b", "LINK", "node:c", None).unwrap();
        store
    }

    #[test]
    fn bfs_visits_each_node_at_shallowest_depth() {
        let store = store_with_chain();
        let graph = GraphEngine::new(&store);
        let traversal = Traversal {
            direction: Some(Direction::Out),
            max_depth: 5,
            ..Default::default()
        };
        let result = graph.query_graph(&["node:a".to_string()], &traversal, ReturnType::Nodes);
        assert_eq!(result.nodes, vec!["node:a", "node:b", "node:c"]);
    }

    #[test]
    fn in_direction_uses_inverted_edge_map() {
        let store = store_with_chain();
        let graph = GraphEngine::new(&store);
        let traversal = Traversal {
            direction: Some(Direction::In),
            max_depth: 5,
            ..Default::default()
        };
        let result = graph.query_graph(&["node:c".to_string()], &traversal, ReturnType::Nodes);
        assert!(result.nodes.contains(&"node:b".to_string()));
        assert!(result.nodes.contains(&"node:a".to_string()));
    }

    #[test]
    fn find_path_returns_shortest_path() {
        let store = store_with_chain();
        let graph = GraphEngine::new(&store);
        let paths = graph.find_path("node:a", "node:c", 5);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].nodes, vec!["node:a", "node:b", "node:c"]);
    }

    #[test]
    fn find_path_respects_max_depth() {
        let store = store_with_chain();
        let graph = GraphEngine::new(&store);
        let paths = graph.find_path("node:a", "node:c", 1);
        assert!(paths.is_empty());
    }
}
