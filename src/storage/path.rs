//! Dotted Key Paths
//!
//! `"foo.bar.baz"` addresses field `bar.baz` inside the value stored under
//! root key `"foo"`.

use serde_json::{Map, Value};

use crate::storage::codec::SEPARATOR;

/// Separator between the root key and the sub-path
pub const PATH_SEPARATOR: char = '.';

/// Splits a key into its root and sub-path segments.
///
/// Dots inside a namespace prefix are part of the root.
pub fn split_path(key: &str) -> (&str, Vec<&str>) {
    let offset = key.find(SEPARATOR).map(|i| i + 1).unwrap_or(0);

    match key[offset..].find(PATH_SEPARATOR) {
        Some(i) => {
            let (root, rest) = key.split_at(offset + i);
            (root, rest[1..].split(PATH_SEPARATOR).collect())
        }
        None => (key, Vec::new()),
    }
}

/// Resolves `path` inside `value`.
pub fn get_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Writes `value` at `path` inside `target`, or removes the field when
/// `value` is None.
///
/// Missing or scalar intermediates are replaced by objects. Array elements
/// are addressed by index; an index one past the end appends.
pub fn set_path(target: &mut Value, path: &[&str], value: Option<Value>) {
    let Some((last, parents)) = path.split_last() else {
        if let Some(value) = value {
            *target = value;
        }
        return;
    };

    let mut current = target;
    for segment in parents {
        let index = match &*current {
            Value::Array(items) => index_in(items, segment),
            _ => None,
        };

        current = match index {
            Some(i) => &mut current[i],
            None => {
                if value.is_none() && current.get(*segment).is_none() {
                    return;
                }
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                &mut current[*segment]
            }
        };
    }

    match (current, value) {
        (Value::Array(items), value) if last.parse::<usize>().is_ok() => {
            let i = last.parse::<usize>().unwrap_or_default();
            match value {
                Some(v) if i < items.len() => items[i] = v,
                Some(v) if i == items.len() => items.push(v),
                None if i < items.len() => {
                    items.remove(i);
                }
                _ => {}
            }
        }
        (Value::Object(map), Some(v)) => {
            map.insert(last.to_string(), v);
        }
        (Value::Object(map), None) => {
            map.remove(*last);
        }
        (current, Some(v)) => {
            let mut map = Map::new();
            map.insert(last.to_string(), v);
            *current = Value::Object(map);
        }
        (_, None) => {}
    }
}

fn index_in(items: &[Value], segment: &str) -> Option<usize> {
    segment.parse::<usize>().ok().filter(|i| *i < items.len())
}
