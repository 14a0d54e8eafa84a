//! A small structural type language for state values.
//!
//! Schemas are checked on every write to a [`crate::State`]. Object schemas
//! are strict: unknown keys are rejected, and a field may only be absent when
//! its schema is optional.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Any,
    Null,
    Boolean,
    Number,
    Integer,
    String,
    Array(Box<Schema>),
    Object(BTreeMap<String, Schema>),
    /// One of a fixed set of literal values.
    Enum(Vec<Value>),
    /// The inner schema or `null`.
    Optional(Box<Schema>),
}

/// Where and why a value failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaMismatch {
    /// JSON path of the offending value, rooted at `$`.
    pub path: String,
    pub expected: String,
    pub found: String,
}

impl Schema {
    pub fn array(items: Schema) -> Self {
        Schema::Array(Box::new(items))
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Schema)>) -> Self {
        Schema::Object(fields.into_iter().map(|(k, s)| (k.into(), s)).collect())
    }

    pub fn one_of(values: impl IntoIterator<Item = Value>) -> Self {
        Schema::Enum(values.into_iter().collect())
    }

    pub fn optional(self) -> Self {
        match self {
            Schema::Optional(_) | Schema::Any => self,
            other => Schema::Optional(Box::new(other)),
        }
    }

    /// Check `value` against this schema.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaMismatch> {
        self.check(value, "$")
    }

    fn check(&self, value: &Value, path: &str) -> Result<(), SchemaMismatch> {
        let mismatch = || SchemaMismatch {
            path: path.to_string(),
            expected: self.to_string(),
            found: describe(value),
        };

        match (self, value) {
            (Schema::Any, _)
            | (Schema::Null, Value::Null)
            | (Schema::Boolean, Value::Bool(_))
            | (Schema::Number, Value::Number(_))
            | (Schema::String, Value::String(_)) => Ok(()),
            (Schema::Integer, Value::Number(n)) => {
                let whole = n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0);
                if whole { Ok(()) } else { Err(mismatch()) }
            }
            (Schema::Optional(_), Value::Null) => Ok(()),
            (Schema::Optional(inner), _) => inner.check(value, path),
            (Schema::Enum(options), _) => {
                if options.contains(value) {
                    Ok(())
                } else {
                    Err(mismatch())
                }
            }
            (Schema::Array(items), Value::Array(values)) => {
                for (i, item) in values.iter().enumerate() {
                    items.check(item, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
            (Schema::Object(fields), Value::Object(map)) => {
                if let Some(unknown) = map.keys().find(|k| !fields.contains_key(*k)) {
                    return Err(SchemaMismatch {
                        path: format!("{path}.{unknown}"),
                        expected: "no such field".into(),
                        found: describe(&map[unknown]),
                    });
                }
                for (name, field) in fields {
                    let field_path = format!("{path}.{name}");
                    match map.get(name) {
                        Some(v) => field.check(v, &field_path)?,
                        None if matches!(field, Schema::Optional(_) | Schema::Any) => {}
                        None => {
                            return Err(SchemaMismatch {
                                path: field_path,
                                expected: field.to_string(),
                                found: "missing".into(),
                            });
                        }
                    }
                }
                Ok(())
            }
            _ => Err(mismatch()),
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(_) => "boolean".into(),
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer".into(),
        Value::Number(_) => "number".into(),
        Value::String(_) => "string".into(),
        Value::Array(_) => "array".into(),
        Value::Object(_) => "object".into(),
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::Any => f.write_str("any"),
            Schema::Null => f.write_str("null"),
            Schema::Boolean => f.write_str("boolean"),
            Schema::Number => f.write_str("number"),
            Schema::Integer => f.write_str("integer"),
            Schema::String => f.write_str("string"),
            Schema::Array(items) => write!(f, "array<{items}>"),
            Schema::Object(fields) => {
                f.write_str("{")?;
                for (i, (name, schema)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {schema}")?;
                }
                f.write_str("}")
            }
            Schema::Enum(options) => {
                let options: Vec<String> = options.iter().map(Value::to_string).collect();
                f.write_str(&options.join(" | "))
            }
            Schema::Optional(inner) => write!(f, "{inner}?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn todo() -> Schema {
        Schema::object([
            ("title", Schema::String),
            ("done", Schema::Boolean),
            ("due", Schema::String.optional()),
        ])
    }

    #[test]
    fn summary_is_readable() {
        assert_eq!(
            Schema::array(todo()).to_string(),
            "array<{done: boolean, due: string?, title: string}>"
        );
        assert_eq!(
            Schema::one_of([json!("low"), json!("high")]).to_string(),
            "\"low\" | \"high\""
        );
    }

    #[test]
    fn valid_values_pass() {
        let schema = Schema::array(todo());
        assert!(schema.validate(&json!([])).is_ok());
        assert!(
            schema
                .validate(&json!([{"title": "a", "done": false}, {"title": "b", "done": true, "due": null}]))
                .is_ok()
        );
    }

    #[test]
    fn mismatch_reports_path() {
        let err = Schema::array(todo())
            .validate(&json!([{"title": "a", "done": false}, {"title": "b", "done": "yes"}]))
            .unwrap_err();
        assert_eq!(err.path, "$[1].done");
        assert_eq!(err.expected, "boolean");
        assert_eq!(err.found, "string");
    }

    #[test]
    fn objects_are_strict() {
        let err = todo()
            .validate(&json!({"title": "a", "done": false, "extra": 1}))
            .unwrap_err();
        assert_eq!(err.path, "$.extra");

        let err = todo().validate(&json!({"title": "a"})).unwrap_err();
        assert_eq!(err.path, "$.done");
        assert_eq!(err.found, "missing");
    }

    #[test]
    fn integers_reject_fractions() {
        assert!(Schema::Integer.validate(&json!(5)).is_ok());
        assert!(Schema::Integer.validate(&json!(5.0)).is_ok());
        assert!(Schema::Integer.validate(&json!(5.5)).is_err());
        assert!(Schema::Number.validate(&json!(5.5)).is_ok());
    }

    #[test]
    fn enums_and_optionals() {
        let priority = Schema::one_of([json!("low"), json!("high")]);
        assert!(priority.validate(&json!("low")).is_ok());
        assert!(priority.validate(&json!("urgent")).is_err());
        assert!(Schema::Integer.optional().validate(&Value::Null).is_ok());
        assert!(Schema::Integer.validate(&Value::Null).is_err());
    }
}
