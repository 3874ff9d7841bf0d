//! Cache Block Module
//!
//! The `{data, meta}` envelope stored for every cache key, and the rules for
//! building, validating and merging its metadata.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// == Public Constants ==
/// Meta field holding the last write time (Unix milliseconds)
pub const UPDATED: &str = "updated";

/// Meta field holding the expiry time (Unix milliseconds)
pub const EXPIRE: &str = "expire";

// == Block ==
/// A cached value with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The stored payload
    pub data: Value,
    /// `updated`, optional `expire`, plus any caller fields
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl Block {
    /// Reads a block back from a stored value. Returns None for anything
    /// that is not a `{data, meta}` object.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Expiration timestamp (Unix milliseconds), None = never expires
    pub fn expire(&self) -> Option<i64> {
        self.meta.get(EXPIRE).and_then(as_millis)
    }

    /// Last write timestamp (Unix milliseconds)
    pub fn updated(&self) -> Option<i64> {
        self.meta.get(UPDATED).and_then(as_millis)
    }

    /// Checks the block against the current time.
    pub fn is_valid(&self) -> bool {
        check_valid(self, current_timestamp_ms())
    }

    // == Time To Live ==
    /// Returns remaining validity in milliseconds, or None if no expiration
    /// is set. Expired blocks report `Some(0)`.
    pub fn ttl_remaining_ms(&self) -> Option<i64> {
        self.expire()
            .map(|expire| (expire - current_timestamp_ms()).max(0))
    }
}

impl From<Block> for Value {
    fn from(block: Block) -> Self {
        let mut map = Map::new();
        map.insert("data".to_string(), block.data);
        map.insert("meta".to_string(), Value::Object(block.meta));
        Value::Object(map)
    }
}

// == Meta ==
/// Metadata accepted by [`crate::CacheEngine::set`].
///
/// A bare timestamp is shorthand for `{expire: timestamp}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Meta {
    /// Expire at this Unix millisecond timestamp
    Expire(i64),
    /// Expire at this instant
    At(DateTime<Utc>),
    /// Arbitrary fields; `expire` may be a number or an RFC 3339 string
    Fields(Map<String, Value>),
}

impl Meta {
    /// Expire `ttl` from now, saturating at the latest representable instant.
    pub fn ttl(ttl: Duration) -> Self {
        Meta::At(
            Utc::now()
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    /// A single caller field.
    pub fn field(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = Map::new();
        map.insert(name.into(), value.into());
        Meta::Fields(map)
    }
}

impl From<i64> for Meta {
    fn from(expire: i64) -> Self {
        Meta::Expire(expire)
    }
}

impl From<DateTime<Utc>> for Meta {
    fn from(at: DateTime<Utc>) -> Self {
        Meta::At(at)
    }
}

impl From<Map<String, Value>> for Meta {
    fn from(fields: Map<String, Value>) -> Self {
        Meta::Fields(fields)
    }
}

impl From<Value> for Meta {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(fields) => Meta::Fields(fields),
            other => {
                let mut fields = Map::new();
                fields.insert(EXPIRE.to_string(), other);
                Meta::Fields(fields)
            }
        }
    }
}

// == Block Rules ==
/// Wraps `data` and `meta` into a block stamped as updated now.
pub fn wrap(data: Value, meta: Map<String, Value>) -> Block {
    wrap_at(data, meta, current_timestamp_ms())
}

pub(crate) fn wrap_at(data: Value, mut meta: Map<String, Value>, now: i64) -> Block {
    meta.insert(UPDATED.to_string(), Value::from(now));
    Block { data, meta }
}

/// A block is valid while it has no expiry or its expiry is after `now`.
///
/// An `expire` field that is not a timestamp never validates.
pub fn check_valid(block: &Block, now: i64) -> bool {
    match block.meta.get(EXPIRE) {
        None | Some(Value::Null) => true,
        Some(expire) => expire.as_f64().is_some_and(|expire| expire > now as f64),
    }
}

/// Turns caller metadata into stored metadata.
///
/// Time objects and RFC 3339 strings become Unix milliseconds. Returns None
/// when the metadata is already expired (or its expiry is unreadable): such
/// a write must not be stored.
pub fn normalize_meta(meta: Meta, now: i64) -> Option<Map<String, Value>> {
    let mut fields = match meta {
        Meta::Expire(expire) => single(EXPIRE, Value::from(expire)),
        Meta::At(at) => single(EXPIRE, Value::from(at.timestamp_millis())),
        Meta::Fields(fields) => fields,
    };

    match fields.remove(EXPIRE) {
        None | Some(Value::Null) => {}
        Some(Value::String(raw)) => {
            let at = DateTime::parse_from_rfc3339(&raw).ok()?;
            fields.insert(EXPIRE.to_string(), Value::from(at.timestamp_millis()));
        }
        Some(number @ Value::Number(_)) => {
            fields.insert(EXPIRE.to_string(), number);
        }
        Some(_) => return None,
    }

    let block = Block {
        data: Value::Null,
        meta: fields,
    };
    check_valid(&block, now).then_some(block.meta)
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn single(name: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(name.to_string(), value);
    map
}

fn as_millis(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}
