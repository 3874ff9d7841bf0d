//! Key and Value Codecs
//!
//! Namespaced physical keys (`"<namespace>:<key>"`) and the wire form of
//! values written to a durable medium.

use serde_json::Value;

use crate::error::{Result, StorageError};

// == Public Constants ==
/// Separator between namespace and logical key
pub const SEPARATOR: char = ':';

/// Deepest value nesting that still parses back from its wire form
pub const MAX_DEPTH: usize = 127;

// == Key Parts ==
/// A physical key split into its namespace and logical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParts {
    /// Owning namespace, empty when the key carried none
    pub namespace: String,
    /// Logical key
    pub key: String,
}

// == Key Codec ==
/// Returns true if the key already carries a namespace.
pub fn is_key_serialized(key: &str) -> bool {
    key.contains(SEPARATOR)
}

/// Prefixes `key` with `namespace` unless it is already namespaced.
pub fn serialize_key(key: &str, namespace: &str) -> String {
    if is_key_serialized(key) {
        key.to_string()
    } else {
        format!("{namespace}{SEPARATOR}{key}")
    }
}

/// Splits a physical key on the first separator.
pub fn deserialize_key(physical_key: &str) -> KeyParts {
    match physical_key.split_once(SEPARATOR) {
        Some((namespace, key)) => KeyParts {
            namespace: namespace.to_string(),
            key: key.to_string(),
        },
        None => KeyParts {
            namespace: String::new(),
            key: physical_key.to_string(),
        },
    }
}

// == Value Codec ==
/// Converts a value to its durable string form.
///
/// Composites are JSON encoded. Scalars are coerced directly, except strings
/// that would read back as a different JSON value (`"42"`, `"true"`), which
/// are JSON quoted so they round-trip as strings.
///
/// Values nested deeper than [`MAX_DEPTH`] are refused: the caller keeps
/// them in memory and skips the durable write.
pub fn serialize_value(value: &Value) -> Result<String> {
    match value {
        Value::Object(_) | Value::Array(_) => {
            if depth(value) > MAX_DEPTH {
                return Err(StorageError::Serialization(format!(
                    "value nesting exceeds {MAX_DEPTH} levels"
                )));
            }
            serde_json::to_string(value).map_err(|e| StorageError::Serialization(e.to_string()))
        }
        Value::String(s) => {
            if serde_json::from_str::<Value>(s).is_ok() {
                serde_json::to_string(s).map_err(|e| StorageError::Serialization(e.to_string()))
            } else {
                Ok(s.clone())
            }
        }
        other => Ok(other.to_string()),
    }
}

/// Reads a value back from its durable string form.
///
/// Anything that is not valid JSON is returned unchanged as a string.
pub fn deserialize_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}
