//! The builtin allow-list: global helpers, the `Math`/`JSON`/`Object`/
//! `console` namespaces, and string and array methods that do not take
//! callbacks.

use serde_json::{Map, Value};

use crate::ScriptError;
use crate::value::{self, number, to_display, type_name};

/// Global helper functions callable by bare name.
pub(crate) const GLOBALS: &[&str] = &[
    "len", "keys", "values", "str", "num", "abs", "min", "max", "floor", "ceil", "round", "log",
    "String", "Number", "Boolean",
];

/// Namespace objects reachable by bare name.
pub(crate) const NAMESPACES: &[&str] = &["Math", "JSON", "Object", "console"];

/// Array methods that write their receiver back.
pub(crate) const MUTATING_ARRAY_METHODS: &[&str] =
    &["push", "pop", "shift", "unshift", "splice", "reverse", "sort"];

pub(crate) fn is_global(name: &str) -> bool {
    GLOBALS.contains(&name)
}

pub(crate) fn is_namespace(name: &str) -> bool {
    NAMESPACES.contains(&name)
}

fn type_error(message: impl Into<String>) -> ScriptError {
    ScriptError::Type(message.into())
}

fn arg(args: &[Value], i: usize) -> &Value {
    args.get(i).unwrap_or(&Value::Null)
}

fn num_arg(function: &str, args: &[Value], i: usize) -> Result<f64, ScriptError> {
    let value = arg(args, i);
    value.as_f64().ok_or_else(|| {
        type_error(format!(
            "{function}() expects a number as argument {}, got {}",
            i + 1,
            type_name(value)
        ))
    })
}

fn str_arg<'a>(function: &str, args: &'a [Value], i: usize) -> Result<&'a str, ScriptError> {
    let value = arg(args, i);
    value.as_str().ok_or_else(|| {
        type_error(format!(
            "{function}() expects a string as argument {}, got {}",
            i + 1,
            type_name(value)
        ))
    })
}

/// Numbers for `min`/`max`: either the argument list or a single array.
fn numbers(function: &str, args: &[Value]) -> Result<Vec<f64>, ScriptError> {
    let items = match args {
        [Value::Array(items)] => items.as_slice(),
        _ => args,
    };
    if items.is_empty() {
        return Err(type_error(format!("{function}() needs at least one number")));
    }
    items
        .iter()
        .enumerate()
        .map(|(i, _)| num_arg(function, items, i))
        .collect()
}

/// Clamp a possibly negative slice index into `0..=len`.
fn resolve_index(index: f64, len: usize) -> usize {
    if index < 0.0 {
        len.saturating_sub((-index) as usize)
    } else {
        (index as usize).min(len)
    }
}

fn js_round(n: f64) -> f64 {
    (n + 0.5).floor()
}

pub(crate) fn to_number(value: &Value) -> Result<f64, ScriptError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| type_error("number out of range")),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Null => Ok(0.0),
        Value::String(s) if s.trim().is_empty() => Ok(0.0),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| type_error(format!("cannot convert '{s}' to a number"))),
        other => Err(type_error(format!(
            "cannot convert {} to a number",
            type_name(other)
        ))),
    }
}

fn object_keys(function: &str, value: &Value) -> Result<Vec<String>, ScriptError> {
    match value {
        Value::Object(map) => Ok(map.keys().cloned().collect()),
        Value::Array(items) => Ok((0..items.len()).map(|i| i.to_string()).collect()),
        other => Err(type_error(format!(
            "{function}() expects an object, got {}",
            type_name(other)
        ))),
    }
}

fn object_values(function: &str, value: &Value) -> Result<Vec<Value>, ScriptError> {
    match value {
        Value::Object(map) => Ok(map.values().cloned().collect()),
        Value::Array(items) => Ok(items.clone()),
        other => Err(type_error(format!(
            "{function}() expects an object, got {}",
            type_name(other)
        ))),
    }
}

fn log_line(args: &[Value]) -> String {
    args.iter().map(to_display).collect::<Vec<_>>().join(" ")
}

/// Call a global helper. The caller has already checked [`is_global`].
pub(crate) fn call_global(
    name: &str,
    args: &[Value],
    logs: &mut Vec<String>,
) -> Result<Value, ScriptError> {
    match name {
        "len" => match arg(args, 0) {
            Value::Array(items) => Ok(number(items.len() as f64)),
            Value::String(s) => Ok(number(s.chars().count() as f64)),
            Value::Object(map) => Ok(number(map.len() as f64)),
            other => Err(type_error(format!(
                "len() expects an array, string or object, got {}",
                type_name(other)
            ))),
        },
        "keys" => Ok(Value::from(object_keys(name, arg(args, 0))?)),
        "values" => Ok(Value::Array(object_values(name, arg(args, 0))?)),
        "str" | "String" => Ok(Value::String(to_display(arg(args, 0)))),
        "num" | "Number" => Ok(number(to_number(arg(args, 0))?)),
        "Boolean" => Ok(Value::Bool(value::truthy(arg(args, 0)))),
        "abs" => Ok(number(num_arg(name, args, 0)?.abs())),
        "floor" => Ok(number(num_arg(name, args, 0)?.floor())),
        "ceil" => Ok(number(num_arg(name, args, 0)?.ceil())),
        "round" => Ok(number(js_round(num_arg(name, args, 0)?))),
        "min" => Ok(number(
            numbers(name, args)?.into_iter().fold(f64::INFINITY, f64::min),
        )),
        "max" => Ok(number(
            numbers(name, args)?
                .into_iter()
                .fold(f64::NEG_INFINITY, f64::max),
        )),
        "log" => {
            let line = log_line(args);
            tracing::debug!(target: "statehive::script", "{line}");
            logs.push(line);
            Ok(Value::Null)
        }
        other => Err(ScriptError::Reference(other.to_string())),
    }
}

/// Read a namespace constant such as `Math.PI`.
pub(crate) fn namespace_property(namespace: &str, property: &str) -> Option<Value> {
    match (namespace, property) {
        ("Math", "PI") => Some(number(std::f64::consts::PI)),
        ("Math", "E") => Some(number(std::f64::consts::E)),
        _ => None,
    }
}

/// Call `Math.*`, `JSON.*`, `Object.*` or `console.log`.
pub(crate) fn call_namespace(
    namespace: &str,
    method: &str,
    args: &[Value],
    logs: &mut Vec<String>,
) -> Result<Value, ScriptError> {
    let qualified = format!("{namespace}.{method}");
    let f = qualified.as_str();
    match (namespace, method) {
        ("Math", "abs" | "floor" | "ceil" | "round" | "min" | "max") => {
            call_global(method, args, logs)
        }
        ("Math", "sqrt") => Ok(number(num_arg(f, args, 0)?.sqrt())),
        ("Math", "trunc") => Ok(number(num_arg(f, args, 0)?.trunc())),
        ("Math", "sign") => Ok(number(num_arg(f, args, 0)?.signum())),
        ("Math", "pow") => Ok(number(num_arg(f, args, 0)?.powf(num_arg(f, args, 1)?))),
        ("JSON", "stringify") => {
            let value = arg(args, 0);
            let pretty = arg(args, 2).as_f64().is_some_and(|n| n > 0.0);
            let text = if pretty {
                serde_json::to_string_pretty(value)
            } else {
                serde_json::to_string(value)
            };
            text.map(Value::String)
                .map_err(|e| type_error(format!("{f}: {e}")))
        }
        ("JSON", "parse") => serde_json::from_str(str_arg(f, args, 0)?)
            .map_err(|e| type_error(format!("{f}: {e}"))),
        ("Object", "keys") => Ok(Value::from(object_keys(f, arg(args, 0))?)),
        ("Object", "values") => Ok(Value::Array(object_values(f, arg(args, 0))?)),
        ("Object", "entries") => {
            let keys = object_keys(f, arg(args, 0))?;
            let values = object_values(f, arg(args, 0))?;
            Ok(Value::Array(
                keys.into_iter()
                    .zip(values)
                    .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
                    .collect(),
            ))
        }
        ("Object", "assign") => {
            let mut merged = Map::new();
            for (i, source) in args.iter().enumerate() {
                match source {
                    Value::Object(map) => merged.extend(map.clone()),
                    Value::Null => {}
                    other => {
                        return Err(type_error(format!(
                            "{f}() expects objects, argument {} is {}",
                            i + 1,
                            type_name(other)
                        )));
                    }
                }
            }
            Ok(Value::Object(merged))
        }
        ("console", "log" | "info" | "warn" | "error") => call_global("log", args, logs),
        _ => Err(type_error(format!("{f} is not a function"))),
    }
}

/// Methods on string receivers.
pub(crate) fn call_string_method(
    s: &str,
    method: &str,
    args: &[Value],
) -> Result<Value, ScriptError> {
    let f = method;
    match method {
        "includes" => Ok(Value::Bool(s.contains(str_arg(f, args, 0)?))),
        "startsWith" => Ok(Value::Bool(s.starts_with(str_arg(f, args, 0)?))),
        "endsWith" => Ok(Value::Bool(s.ends_with(str_arg(f, args, 0)?))),
        "indexOf" => {
            let needle = str_arg(f, args, 0)?;
            let index = s
                .find(needle)
                .map(|byte| s[..byte].chars().count() as f64)
                .unwrap_or(-1.0);
            Ok(number(index))
        }
        "toUpperCase" => Ok(Value::String(s.to_uppercase())),
        "toLowerCase" => Ok(Value::String(s.to_lowercase())),
        "trim" => Ok(Value::String(s.trim().to_string())),
        "split" => {
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Null => vec![Value::String(s.to_string())],
                Value::String(sep) if sep.is_empty() => {
                    s.chars().map(|c| Value::String(c.to_string())).collect()
                }
                Value::String(sep) => s
                    .split(sep.as_str())
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
                other => {
                    return Err(type_error(format!(
                        "split() expects a string separator, got {}",
                        type_name(other)
                    )));
                }
            };
            Ok(Value::Array(parts))
        }
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(f, args, chars.len())?;
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        "replace" => Ok(Value::String(s.replacen(
            str_arg(f, args, 0)?,
            str_arg(f, args, 1)?,
            1,
        ))),
        "replaceAll" => Ok(Value::String(
            s.replace(str_arg(f, args, 0)?, str_arg(f, args, 1)?),
        )),
        _ => Err(type_error(format!("string.{method} is not a function"))),
    }
}

fn slice_bounds(f: &str, args: &[Value], len: usize) -> Result<(usize, usize), ScriptError> {
    let start = match arg(args, 0) {
        Value::Null => 0,
        _ => resolve_index(num_arg(f, args, 0)?, len),
    };
    let end = match arg(args, 1) {
        Value::Null => len,
        _ => resolve_index(num_arg(f, args, 1)?, len),
    };
    Ok((start, end.max(start)))
}

/// Non-mutating array methods that take plain values.
pub(crate) fn call_array_method(
    items: &[Value],
    method: &str,
    args: &[Value],
) -> Result<Value, ScriptError> {
    let f = method;
    match method {
        "includes" => Ok(Value::Bool(
            items.iter().any(|item| value::equals(item, arg(args, 0))),
        )),
        "indexOf" => {
            let index = items
                .iter()
                .position(|item| value::equals(item, arg(args, 0)))
                .map(|i| i as f64)
                .unwrap_or(-1.0);
            Ok(number(index))
        }
        "join" => {
            let sep = match arg(args, 0) {
                Value::Null => ",",
                _ => str_arg(f, args, 0)?,
            };
            Ok(Value::String(
                items.iter().map(to_display).collect::<Vec<_>>().join(sep),
            ))
        }
        "slice" => {
            let (start, end) = slice_bounds(f, args, items.len())?;
            Ok(Value::Array(items[start..end].to_vec()))
        }
        "concat" => {
            let mut joined = items.to_vec();
            for extra in args {
                match extra {
                    Value::Array(more) => joined.extend(more.iter().cloned()),
                    other => joined.push(other.clone()),
                }
            }
            Ok(Value::Array(joined))
        }
        _ => Err(type_error(format!("array.{method} is not a function"))),
    }
}

/// Mutating array methods. Returns the method's result; `items` holds the
/// updated receiver.
pub(crate) fn mutate_array(
    items: &mut Vec<Value>,
    method: &str,
    args: &[Value],
) -> Result<Value, ScriptError> {
    let f = method;
    match method {
        "push" => {
            items.extend(args.iter().cloned());
            Ok(number(items.len() as f64))
        }
        "pop" => Ok(items.pop().unwrap_or(Value::Null)),
        "shift" => Ok(if items.is_empty() {
            Value::Null
        } else {
            items.remove(0)
        }),
        "unshift" => {
            items.splice(0..0, args.iter().cloned());
            Ok(number(items.len() as f64))
        }
        "splice" => {
            let start = resolve_index(num_arg(f, args, 0)?, items.len());
            let count = match arg(args, 1) {
                Value::Null => items.len() - start,
                _ => (num_arg(f, args, 1)?.max(0.0) as usize).min(items.len() - start),
            };
            let inserted = args.iter().skip(2).cloned();
            let removed: Vec<Value> = items.splice(start..start + count, inserted).collect();
            Ok(Value::Array(removed))
        }
        "reverse" => {
            items.reverse();
            Ok(Value::Array(items.clone()))
        }
        "sort" => {
            if !args.is_empty() {
                return Err(type_error(
                    "sort() does not take a comparator; sort by a key with map() first",
                ));
            }
            if items.iter().all(Value::is_number) {
                items.sort_by(|a, b| value::compare(a, b).unwrap_or(std::cmp::Ordering::Equal));
            } else {
                items.sort_by_key(to_display);
            }
            Ok(Value::Array(items.clone()))
        }
        _ => Err(type_error(format!("array.{method} is not a function"))),
    }
}
