//! Owned variant tree for entity attributes and document fields.
//!
//! Redesign flag (spec §9, "untyped JSON payloads"): rather than threading
//! `serde_json::Value` into predicate evaluation, the engine owns a single
//! tagged tree type and converts at the serialization boundary. This keeps
//! the query engine decoupled from a specific JSON crate's representation,
//! mirroring the way the teacher codebase defines its own `core` types
//! rather than passing library types through business logic.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A JSON-shaped value: the common currency of attributes, document
/// elements, and query literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number, stored as `f64` (FiberDB does not distinguish int/float
    /// at the storage layer; callers needing exact integers should compare
    /// with integer literals, which round-trip exactly up to 2^53).
    Number(f64),
    /// JSON string.
    String(String),
    /// JSON array.
    Array(Vec<Value>),
    /// JSON object. Backed by a `BTreeMap` so field order is deterministic,
    /// which keeps query-cache keys (canonical serializations) stable.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// True if this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow as a string, if this is a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as a number, if this is a `Number` value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrow as an array, if this is an `Array` value.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow as an object, if this is an `Object` value.
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a field by name when this value is an object.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(field))
    }

    /// Convert from `serde_json::Value` at the storage/wire boundary.
    pub fn from_json(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to `serde_json::Value` at the storage/wire boundary.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Partial ordering used by range-index/`gt`/`lt` comparisons. Mixed
    /// types never error; they simply compare as unordered (`None`), which
    /// the predicate evaluator treats as "condition not satisfied".
    pub fn partial_cmp_value(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// `contains` semantics: substring match for strings, membership for
    /// arrays, otherwise false. Used by predicate evaluation and the text
    /// index.
    pub fn contains(&self, needle: &Value) -> bool {
        match (self, needle) {
            (Value::String(hay), Value::String(n)) => hay.contains(n.as_str()),
            (Value::Array(items), n) => items.contains(n),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let original = serde_json::json!({"name": "Acme", "revenue": 1500, "tags": ["a", "b"]});
        let value = Value::from_json(original.clone());
        assert_eq!(value.to_json(), original);
    }

    #[test]
    fn contains_is_substring_on_strings() {
        let hay = Value::String("hello world".into());
        assert!(hay.contains(&Value::String("wor".into())));
        assert!(!hay.contains(&Value::String("xyz".into())));
    }

    #[test]
    fn mixed_type_comparisons_are_unordered() {
        let a = Value::Number(1.0);
        let b = Value::String("1".into());
        assert_eq!(a.partial_cmp_value(&b), None);
    }
}
