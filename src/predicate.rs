//! Predicate vocabulary shared between the query engine and the index
//! manager: the `Cond` shape and `op` set from spec §4.5.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// One of the six operators a [`Condition`] may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Strictly greater than (orderable types only).
    Gt,
    /// Strictly less than (orderable types only).
    Lt,
    /// Substring match on strings, membership on arrays.
    Contains,
    /// Right-hand side is an array; membership test.
    In,
}

/// A predicate against a single field: either a bare literal (implicit
/// `eq`) or `{op: value}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Operator to apply.
    pub op: Operator,
    /// Right-hand side.
    pub value: Value,
}

impl Condition {
    /// Build an implicit-`eq` condition from a literal.
    pub fn eq(value: Value) -> Self {
        Self {
            op: Operator::Eq,
            value,
        }
    }

    /// Evaluate this condition against `field_value`. Comparisons on mixed
    /// types yield `false`, never an error (spec §4.5).
    pub fn matches(&self, field_value: &Value) -> bool {
        match self.op {
            Operator::Eq => field_value == &self.value,
            Operator::Ne => field_value != &self.value,
            Operator::Gt => matches!(
                field_value.partial_cmp_value(&self.value),
                Some(std::cmp::Ordering::Greater)
            ),
            Operator::Lt => matches!(
                field_value.partial_cmp_value(&self.value),
                Some(std::cmp::Ordering::Less)
            ),
            Operator::Contains => field_value.contains(&self.value),
            Operator::In => match &self.value {
                Value::Array(items) => items.contains(field_value),
                _ => false,
            },
        }
    }
}

/// Deserialize a raw JSON condition value: either a bare literal or a
/// single-key `{op: value}` object. Returns `InvalidQuery`-flavored `None`
/// on an unrecognized operator key, leaving the caller to raise the error
/// with query context attached.
pub fn parse_condition(raw: &serde_json::Value) -> Option<Condition> {
    if let serde_json::Value::Object(map) = raw {
        if map.len() == 1 {
            let (op_key, value) = map.iter().next().unwrap();
            let op = match op_key.as_str() {
                "eq" => Operator::Eq,
                "ne" => Operator::Ne,
                "gt" => Operator::Gt,
                "lt" => Operator::Lt,
                "contains" => Operator::Contains,
                "in" => Operator::In,
                _ => return None,
            };
            return Some(Condition {
                op,
                value: Value::from_json(value.clone()),
            });
        }
    }
    Some(Condition::eq(Value::from_json(raw.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_literal_is_implicit_eq() {
        let cond = parse_condition(&serde_json::json!("NW")).unwrap();
        assert_eq!(cond.op, Operator::Eq);
        assert!(cond.matches(&Value::from("NW")));
    }

    #[test]
    fn gt_condition_parses_and_matches() {
        let cond = parse_condition(&serde_json::json!({"gt": 1000})).unwrap();
        assert!(cond.matches(&Value::from(1500.0)));
        assert!(!cond.matches(&Value::from(500.0)));
    }

    #[test]
    fn unknown_operator_key_returns_none() {
        assert!(parse_condition(&serde_json::json!({"regex": "x"})).is_none());
    }

    #[test]
    fn mixed_type_gt_never_errors_and_is_false() {
        let cond = Condition {
            op: Operator::Gt,
            value: Value::from("x"),
        };
        assert!(!cond.matches(&Value::Number(5.0)));
    }
}
