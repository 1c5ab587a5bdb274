//! Lenient readers for marketplace JSON.
//!
//! Platforms disagree on whether numbers arrive as numbers or strings and
//! on whether a one-element list is a list or a bare object; parsers read
//! through these helpers instead of deserializing into strict structs.

use serde_json::Value;

static NULL: Value = Value::Null;

/// Walk nested object keys; missing steps yield `Null`.
#[must_use]
pub fn at<'a>(value: &'a Value, path: &[&str]) -> &'a Value {
    path.iter().fold(value, |v, key| v.get(*key).unwrap_or(&NULL))
}

/// String or number rendered as a string; `None` for null/absent/empty.
#[must_use]
pub fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[must_use]
pub fn text_at(value: &Value, path: &[&str]) -> Option<String> {
    text(at(value, path))
}

#[must_use]
pub fn text_or(value: &Value, path: &[&str], default: &str) -> String {
    text_at(value, path).unwrap_or_else(|| default.to_string())
}

#[must_use]
pub fn number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[must_use]
pub fn number_at(value: &Value, path: &[&str]) -> f64 {
    number(at(value, path))
}

/// Non-negative integer; fractional and negative values clamp.
#[must_use]
pub fn count_at(value: &Value, path: &[&str]) -> u32 {
    let n = number_at(value, path);
    if n.is_finite() && n > 0.0 {
        n.min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

/// Elements of a list; a bare object counts as a one-element list.
#[must_use]
pub fn list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    }
}

#[must_use]
pub fn list_at<'a>(value: &'a Value, path: &[&str]) -> Vec<&'a Value> {
    list(at(value, path))
}

/// Up to `max` non-empty strings from a JSON string array.
#[must_use]
pub fn strings_at(value: &Value, path: &[&str], max: usize) -> Vec<String> {
    list_at(value, path)
        .into_iter()
        .filter_map(text)
        .take(max)
        .collect()
}

/// `true`, `1`, or `"true"`/`"1"` (case-insensitive).
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "1"),
        _ => false,
    }
}

/// `code` field equal to zero (number or string).
#[must_use]
pub fn code_is_zero(value: &Value) -> bool {
    match value.get("code") {
        Some(Value::Number(n)) => n.as_i64() == Some(0),
        Some(Value::String(s)) => s.trim() == "0",
        _ => false,
    }
}
