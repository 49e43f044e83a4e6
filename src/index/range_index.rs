//! Range index: an ordered structure keyed by comparable value, supporting
//! `eq`, `gt`, `lt`, and their compositions.

use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};

use crate::value::Value;

/// Values are ordered by `OrderedFloat` for numbers (the same total-order
/// wrapper the teacher's tessellation module keys a set by) and
/// lexicographically for strings; mixed-type entries are kept in separate
/// buckets and never compared against each other (comparisons across types
/// simply never match, mirroring `Value::partial_cmp_value`).
#[derive(Debug, Clone, PartialEq, PartialOrd, Eq, Ord)]
enum OrderedKey {
    Number(OrderedFloat<f64>),
    Text(String),
}

fn ordered_key(value: &Value) -> Option<OrderedKey> {
    match value {
        Value::Number(n) => Some(OrderedKey::Number(OrderedFloat(*n))),
        Value::String(s) => Some(OrderedKey::Text(s.clone())),
        _ => None,
    }
}

/// Ordered posting-list index over comparable field values.
pub struct RangeIndex {
    postings: RwLock<BTreeMap<OrderedKey, HashSet<String>>>,
}

impl RangeIndex {
    /// Build an empty range index.
    pub fn new() -> Self {
        Self {
            postings: RwLock::new(BTreeMap::new()),
        }
    }

    /// Index `entity_id` under `value`, if `value` is orderable.
    pub fn insert(&self, value: &Value, entity_id: &str) {
        if let Some(key) = ordered_key(value) {
            self.postings
                .write()
                .entry(key)
                .or_default()
                .insert(entity_id.to_string());
        }
    }

    /// Remove `entity_id` from the posting list for `value`.
    pub fn remove(&self, value: &Value, entity_id: &str) {
        if let Some(key) = ordered_key(value) {
            if let Some(set) = self.postings.write().get_mut(&key) {
                set.remove(entity_id);
            }
        }
    }

    /// Remove `entity_id` from every posting list.
    pub fn remove_all(&self, entity_id: &str) {
        let mut postings = self.postings.write();
        for set in postings.values_mut() {
            set.remove(entity_id);
        }
    }

    /// Ids where the field equals `value`.
    pub fn eq(&self, value: &Value) -> HashSet<String> {
        match ordered_key(value) {
            Some(key) => self
                .postings
                .read()
                .get(&key)
                .cloned()
                .unwrap_or_default(),
            None => HashSet::new(),
        }
    }

    /// Ids where the field is strictly greater than `value`.
    pub fn gt(&self, value: &Value) -> HashSet<String> {
        let Some(key) = ordered_key(value) else {
            return HashSet::new();
        };
        let postings = self.postings.read();
        postings
            .range((std::ops::Bound::Excluded(key), std::ops::Bound::Unbounded))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Ids where the field is strictly less than `value`.
    pub fn lt(&self, value: &Value) -> HashSet<String> {
        let Some(key) = ordered_key(value) else {
            return HashSet::new();
        };
        let postings = self.postings.read();
        postings
            .range((std::ops::Bound::Unbounded, std::ops::Bound::Excluded(key)))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Number of distinct values indexed.
    pub fn distinct_values(&self) -> usize {
        self.postings.read().len()
    }
}

impl Default for RangeIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with_revenues() -> RangeIndex {
        let idx = RangeIndex::new();
        idx.insert(&Value::from(500.0), "c1");
        idx.insert(&Value::from(1500.0), "c2");
        idx.insert(&Value::from(2500.0), "c3");
        idx
    }

    #[test]
    fn gt_returns_strictly_greater_entries() {
        let idx = index_with_revenues();
        let result = idx.gt(&Value::from(1000.0));
        assert_eq!(result, HashSet::from(["c2".to_string(), "c3".to_string()]));
    }

    #[test]
    fn lt_returns_strictly_lesser_entries() {
        let idx = index_with_revenues();
        let result = idx.lt(&Value::from(2000.0));
        assert_eq!(result, HashSet::from(["c1".to_string(), "c2".to_string()]));
    }

    #[test]
    fn non_orderable_values_are_ignored() {
        let idx = RangeIndex::new();
        idx.insert(&Value::Bool(true), "c1");
        assert_eq!(idx.distinct_values(), 0);
    }
}
