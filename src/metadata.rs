//! Arbitrary nested metadata attached to libraries, documents and chunks.
//!
//! Metadata is a closed set of variants so the filter engine can dispatch on
//! type exhaustively. It (de)serializes as plain JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A metadata record: string keys mapped to nested values.
pub type Metadata = BTreeMap<String, Value>;

/// One node of a metadata tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Human readable name of the variant, used in filter errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            // Integers wider than 2^53 lose precision, same as any JSON
            // consumer that stores numbers as doubles.
            serde_json::Value::Number(n) => {
                n.as_f64().map_or(Value::Null, Value::Number)
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// Convert a JSON object into a metadata record.
///
/// # Examples
///
/// ```
/// use vecstore::metadata::{self, Value};
///
/// let meta = metadata::from_json(serde_json::json!({"a": {"b": 7}})).unwrap();
/// let b = metadata::lookup(&meta, &["a", "b"]);
/// assert_eq!(b, Some(&Value::Number(7.0)));
/// ```
pub fn from_json(value: serde_json::Value) -> Result<Metadata> {
    match Value::from(value) {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidMetadata(format!(
            "metadata must be an object, got {}",
            other.type_name()
        ))),
    }
}

/// Resolve a dot path through nested objects.
///
/// Returns `None` when any segment is absent or an intermediate value is
/// not an object.
pub fn lookup<'a, S: AsRef<str>>(
    metadata: &'a Metadata,
    path: &[S],
) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = metadata.get(first.as_ref())?;
    for segment in rest {
        current = current.as_object()?.get(segment.as_ref())?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deserializes_nested_json() {
        let meta: Metadata = serde_json::from_value(json!({
            "tags": ["ml", "rust"],
            "rating": 4.5,
            "published": true,
            "author": {"name": "Smith"},
            "note": null
        }))
        .unwrap();

        assert_eq!(meta["rating"], Value::Number(4.5));
        assert_eq!(meta["published"], Value::Bool(true));
        assert_eq!(meta["note"], Value::Null);
        assert_eq!(
            meta["tags"],
            Value::Array(vec![Value::from("ml"), Value::from("rust")])
        );
        assert_eq!(
            lookup(&meta, &["author", "name"]),
            Some(&Value::from("Smith"))
        );
    }

    #[test]
    fn serializes_back_to_plain_json() {
        let meta = from_json(json!({"a": {"b": [1, null, "x"]}})).unwrap();
        let out = serde_json::to_value(&meta).unwrap();
        assert_eq!(out, json!({"a": {"b": [1.0, null, "x"]}}));
    }

    #[test]
    fn lookup_through_non_object_is_missing() {
        let meta = from_json(json!({"a": 3, "b": {"c": {}}})).unwrap();
        assert_eq!(lookup(&meta, &["a", "x"]), None);
        assert_eq!(lookup(&meta, &["b", "c", "d"]), None);
        assert_eq!(lookup::<&str>(&meta, &[]), None);
        assert!(lookup(&meta, &["b", "c"]).is_some());
    }

    #[test]
    fn non_object_metadata_is_rejected() {
        assert!(from_json(json!([1, 2])).is_err());
    }
}
