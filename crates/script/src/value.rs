//! Helpers for treating `serde_json::Value` as the script's value type.

use serde_json::{Number, Value};
use std::cmp::Ordering;

/// Largest integer an f64 represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Convert an f64 to a JSON value. Whole numbers become JSON integers so
/// `5` renders as `5`, not `5.0`. Non-finite results become `null`.
pub fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// JavaScript truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// String conversion used by `+`, template literals and `String(x)`.
pub fn to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".into(),
        Value::Array(items) => items.iter().map(to_display).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

/// Equality for `==` / `===`: numbers compare numerically, everything else
/// structurally.
pub fn equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering for `<`, `<=`, `>`, `>=`: numbers with numbers, strings with
/// strings. Anything else is incomparable.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whole_numbers_become_integers() {
        assert_eq!(number(5.0), json!(5));
        assert_eq!(number(2.5), json!(2.5));
        assert_eq!(number(f64::NAN), Value::Null);
    }

    #[test]
    fn truthiness_follows_javascript() {
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&Value::Null));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!("0")));
    }

    #[test]
    fn integer_and_float_compare_equal() {
        assert!(equals(&json!(1), &json!(1.0)));
        assert!(!equals(&json!("1"), &json!(1)));
    }

    #[test]
    fn display_of_strings_is_unquoted() {
        assert_eq!(to_display(&json!("hi")), "hi");
        assert_eq!(to_display(&json!([1, "a"])), "1,a");
        assert_eq!(to_display(&json!({"a": 1})), "{\"a\":1}");
    }
}
