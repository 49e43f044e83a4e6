//! Hash index: `value -> set<entityId>`, supporting `eq`/`ne`/`in`.

use dashmap::DashMap;
use std::collections::HashSet;

use crate::value::Value;

/// Canonicalize a [`Value`] into a hashable string key. Numbers use their
/// `to_bits` representation so `NaN`/`-0.0` don't silently collide with
/// other values, and string comparisons respect `ignore_case`.
fn canonical_key(value: &Value, ignore_case: bool) -> String {
    match value {
        Value::String(s) if ignore_case => s.to_lowercase(),
        other => other.to_string(),
    }
}

/// Posting-list hash index. Concurrent reads/writes via `DashMap`, matching
/// the teacher's use of `dashmap` for index-adjacent concurrent structures
/// in `database/query_optimizer.rs`.
pub struct HashIndex {
    postings: DashMap<String, HashSet<String>>,
    ignore_case: bool,
}

impl HashIndex {
    /// Build an empty hash index.
    pub fn new(ignore_case: bool) -> Self {
        Self {
            postings: DashMap::new(),
            ignore_case,
        }
    }

    /// Add `entity_id` to the posting list for `value`.
    pub fn insert(&self, value: &Value, entity_id: &str) {
        self.postings
            .entry(canonical_key(value, self.ignore_case))
            .or_default()
            .insert(entity_id.to_string());
    }

    /// Remove `entity_id` from the posting list for `value`, if present.
    pub fn remove(&self, value: &Value, entity_id: &str) {
        if let Some(mut set) = self.postings.get_mut(&canonical_key(value, self.ignore_case)) {
            set.remove(entity_id);
        }
    }

    /// Remove `entity_id` from every posting list (used when an entity is
    /// deleted or its field value is being replaced and the old value is
    /// unknown).
    pub fn remove_all(&self, entity_id: &str) {
        for mut entry in self.postings.iter_mut() {
            entry.value_mut().remove(entity_id);
        }
    }

    /// Ids where the field equals `value`.
    pub fn eq(&self, value: &Value) -> HashSet<String> {
        self.postings
            .get(&canonical_key(value, self.ignore_case))
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// Ids where the field does not equal `value`.
    pub fn ne(&self, value: &Value) -> HashSet<String> {
        let excluded = canonical_key(value, self.ignore_case);
        let mut result = HashSet::new();
        for entry in self.postings.iter() {
            if entry.key() != &excluded {
                result.extend(entry.value().iter().cloned());
            }
        }
        result
    }

    /// Ids where the field's value is a member of `values`.
    pub fn in_set(&self, values: &[Value]) -> HashSet<String> {
        let mut result = HashSet::new();
        for v in values {
            result.extend(self.eq(v));
        }
        result
    }

    /// Number of distinct values indexed, used for index-statistics
    /// reporting.
    pub fn distinct_values(&self) -> usize {
        self.postings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_and_ne_are_complementary() {
        let idx = HashIndex::new(false);
        idx.insert(&Value::from("NW"), "c1");
        idx.insert(&Value::from("SE"), "c2");

        assert_eq!(idx.eq(&Value::from("NW")), HashSet::from(["c1".to_string()]));
        assert_eq!(idx.ne(&Value::from("NW")), HashSet::from(["c2".to_string()]));
    }

    #[test]
    fn case_insensitive_mode_folds_keys() {
        let idx = HashIndex::new(true);
        idx.insert(&Value::from("Acme"), "c1");
        assert_eq!(idx.eq(&Value::from("acme")), HashSet::from(["c1".to_string()]));
    }

    #[test]
    fn in_set_unions_postings() {
        let idx = HashIndex::new(false);
        idx.insert(&Value::from(500.0), "c1");
        idx.insert(&Value::from(1500.0), "c2");
        idx.insert(&Value::from(2500.0), "c3");
        let result = idx.in_set(&[Value::from(500.0), Value::from(2500.0)]);
        assert_eq!(result, HashSet::from(["c1".to_string(), "c3".to_string()]));
    }
}
