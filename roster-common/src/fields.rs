//! Typed row field values
//!
//! A row's payload is a map from column name to a tagged scalar. Values
//! arrive from JSON request bodies and CSV cells, and leave as JSON again,
//! so the wire shape is untagged: `"x"`, `12`, `true`, `null`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decrypted row payload: column name -> value
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Encrypted row payload as persisted (ciphertext strings, `null`, or
/// system fields passed through untouched)
pub type StoredFields = serde_json::Map<String, Value>;

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    /// Only produced programmatically; JSON dates arrive as `Text`
    Date(DateTime<Utc>),
    /// Nested arrays/objects, kept verbatim
    Json(Value),
}

impl FieldValue {
    /// `Null` and the empty string count as "no value"
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// String coercion used for encryption, identity keys and exports.
    ///
    /// Returns `None` for `Null`.
    pub fn to_plain_string(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::Number(n) => Some(n.to_string()),
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Date(d) => Some(d.to_rfc3339()),
            FieldValue::Json(v) => Some(v.to_string()),
        }
    }

    /// Convert back to a plain JSON value
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Number(n) => Value::Number(n.clone()),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Date(d) => Value::String(d.to_rfc3339()),
            FieldValue::Json(v) => v.clone(),
        }
    }

    /// Numeric view, if the value is a number or a numeric string
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => n.as_f64(),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => FieldValue::Number(n),
            Value::String(s) => FieldValue::Text(s),
            other => FieldValue::Json(other),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value.into())
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Date(value)
    }
}

/// Look up a field, treating a missing key as `Null`
pub fn field<'a>(fields: &'a FieldMap, key: &str) -> &'a FieldValue {
    const NULL: &FieldValue = &FieldValue::Null;
    fields.get(key).unwrap_or(NULL)
}

/// Convert a JSON object into a field map
pub fn field_map_from_json(object: serde_json::Map<String, Value>) -> FieldMap {
    object
        .into_iter()
        .map(|(k, v)| (k, FieldValue::from(v)))
        .collect()
}

/// Build a field map from `(column, text)` pairs
///
/// ```
/// use roster_common::fields::{field_map, FieldValue};
///
/// let row = field_map([("Student First", "Amy"), ("Grade", "10")]);
/// assert_eq!(row["Grade"], FieldValue::Text("10".into()));
/// ```
pub fn field_map<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> FieldMap {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), FieldValue::from(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_untagged_deserialize() {
        let row: FieldMap =
            serde_json::from_value(json!({"a": "x", "b": 3, "c": null, "d": true, "e": [1, 2]}))
                .unwrap();
        assert_eq!(row["a"], FieldValue::Text("x".into()));
        assert_eq!(row["b"], FieldValue::Number(3.into()));
        assert_eq!(row["c"], FieldValue::Null);
        assert_eq!(row["d"], FieldValue::Bool(true));
        assert_eq!(row["e"], FieldValue::Json(json!([1, 2])));
    }

    #[test]
    fn test_is_empty() {
        assert!(FieldValue::Null.is_empty());
        assert!(FieldValue::from("").is_empty());
        assert!(!FieldValue::from("0").is_empty());
        assert!(!FieldValue::from(0).is_empty());
        assert!(!FieldValue::Bool(false).is_empty());
    }

    #[test]
    fn test_plain_string_coercion() {
        assert_eq!(FieldValue::from(10).to_plain_string().as_deref(), Some("10"));
        assert_eq!(FieldValue::Bool(false).to_plain_string().as_deref(), Some("false"));
        assert_eq!(FieldValue::Null.to_plain_string(), None);
    }

    #[test]
    fn test_missing_field_reads_as_null() {
        let row = field_map([("a", "x")]);
        assert_eq!(field(&row, "missing"), &FieldValue::Null);
    }
}
