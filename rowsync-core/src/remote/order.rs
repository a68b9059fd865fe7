//! Server-side ordering of children.

use serde_json::Value;
use std::cmp::Ordering;

use crate::item::{Item, Key};

/// How a collection orders its children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OrderBy {
    /// Lexicographic key order. Push keys make this insertion order.
    #[default]
    Key,
    /// Order by a top-level child of each value, ties broken by key.
    Child(String),
}

impl OrderBy {
    /// Compare two children under this ordering.
    pub fn compare(&self, a_key: &Key, a_value: &Value, b_key: &Key, b_value: &Value) -> Ordering {
        match self {
            OrderBy::Key => a_key.cmp(b_key),
            OrderBy::Child(field) => {
                let a = a_value.get(field).unwrap_or(&Value::Null);
                let b = b_value.get(field).unwrap_or(&Value::Null);
                compare_values(a, b).then_with(|| a_key.cmp(b_key))
            }
        }
    }

    pub fn compare_items(&self, a: &Item, b: &Item) -> Ordering {
        self.compare(&a.key, &a.value, &b.key, &b.value)
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) | Value::Object(_) => 5,
    }
}

/// Total order over JSON values:
/// null < false < true < numbers < strings < arrays and objects.
///
/// Arrays and objects compare equal to each other.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_type_ranking() {
        let ordered = [
            json!(null),
            json!(false),
            json!(true),
            json!(-3),
            json!(2.5),
            json!(10),
            json!("a"),
            json!("b"),
            json!({"x": 1}),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(
                compare_values(&pair[0], &pair[1]),
                Ordering::Less,
                "{} should sort before {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_child_order_breaks_ties_by_key() {
        let order = OrderBy::Child("priority".into());
        let a = Item::new("a", json!({"priority": 1}));
        let b = Item::new("b", json!({"priority": 1}));
        let c = Item::new("c", json!({"priority": 0}));
        assert_eq!(order.compare_items(&a, &b), Ordering::Less);
        assert_eq!(order.compare_items(&c, &a), Ordering::Less);
    }

    #[test]
    fn test_missing_child_sorts_as_null() {
        let order = OrderBy::Child("priority".into());
        let missing = Item::new("z", json!({"text": "no priority"}));
        let zero = Item::new("a", json!({"priority": 0}));
        assert_eq!(order.compare_items(&missing, &zero), Ordering::Less);
    }

    #[test]
    fn test_key_order() {
        let order = OrderBy::default();
        let a = Item::new("a", json!({"priority": 9}));
        let b = Item::new("b", json!({"priority": 0}));
        assert_eq!(order.compare_items(&a, &b), Ordering::Less);
    }
}
