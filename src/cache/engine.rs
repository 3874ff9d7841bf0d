//! Cache Engine Module
//!
//! Expiry-aware wrap/unwrap and metadata merging on top of one storage.

use std::sync::Arc;

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::cache::entry::{
    check_valid, current_timestamp_ms, normalize_meta, wrap_at, Block, Meta, EXPIRE,
};
use crate::config::Config;
use crate::error::Result;
use crate::notify::{ChangeHub, Notifier, SubscriptionId};
use crate::storage::path::{get_path, set_path, split_path};
use crate::storage::{DurableMedium, Storage, StorageRegistry, CACHE};

// == Cache Engine ==
/// Key-value cache with per-entry expiration.
///
/// Every key is stored as a [`Block`] under its root key (the part before
/// the first `.`). Expired blocks are never served; they are swept when the
/// engine is built.
#[derive(Debug)]
pub struct CacheEngine {
    /// Backing storage, conventionally namespace `cache`
    storage: Storage,
    /// Observers of committed changes
    notifier: Arc<Notifier>,
    /// Expiry applied to new entries created without one
    default_ttl: Option<Duration>,
}

impl CacheEngine {
    // == Constructor ==
    /// Builds an engine over `storage` and removes every entry that is
    /// already expired (or is not a block), then flushes those removals.
    pub fn new(storage: Storage) -> Self {
        let notifier = Arc::new(Notifier::new());

        // External changes of the storage are changes of the cache.
        let sink = Arc::clone(&notifier);
        storage.subscribe(move |key| sink.notify(key));

        let mut engine = Self {
            storage,
            notifier,
            default_ttl: None,
        };
        let removed = engine.sweep();
        engine.storage.flush();

        info!(
            "Cache engine ready on namespace {}: {} entries, {} expired removed",
            engine.storage.namespace(),
            engine.storage.len(),
            removed
        );
        engine
    }

    /// Builds an engine from configuration over an optional medium.
    pub fn from_config(
        config: &Config,
        medium: Option<Arc<dyn DurableMedium>>,
        hub: Option<&Arc<ChangeHub>>,
    ) -> Self {
        let storage = Storage::open(config.namespace.clone(), medium, hub);
        let engine = Self::new(storage);

        let Some(secs) = config.default_ttl else {
            return engine;
        };
        match i64::try_from(secs).ok().and_then(Duration::try_seconds) {
            Some(ttl) => engine.with_default_ttl(ttl),
            None => {
                warn!("Ignoring default TTL of {}s: out of range", secs);
                engine
            }
        }
    }

    /// Builds an engine over the registry's `cache` storage.
    ///
    /// Fails if the registry cannot resolve it.
    pub fn from_registry(registry: &StorageRegistry) -> Result<Self> {
        Ok(Self::new(registry.storage_for(CACHE)?))
    }

    /// Sets the expiry applied to newly created entries that carry none.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    // == Accessors ==
    /// The backing storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Raw block stored under a root key, valid or not.
    pub fn get_block(&self, key: &str) -> Option<Block> {
        self.storage.get(key).and_then(Block::from_value)
    }

    fn valid_block(&self, key: &str, now: i64) -> Option<Block> {
        self.get_block(key).filter(|block| check_valid(block, now))
    }

    // == Get ==
    /// Returns the data stored under `key` if present and not expired.
    ///
    /// A dotted key resolves a field inside its root's data.
    pub fn get(&self, key: &str) -> Option<Value> {
        let (root, path) = split_path(key);
        let block = self.valid_block(root, current_timestamp_ms())?;
        get_path(&block.data, &path).cloned()
    }

    /// Like [`CacheEngine::get`], deserialized into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    // == Set ==
    /// Stores `value` under `key`, or deletes it when `value` is None or null.
    ///
    /// A dotted key deep-sets the field inside the existing root data. Meta
    /// fields are merged into the previous block's meta, new fields winning.
    /// Metadata that is already expired cancels the whole write; the return
    /// value is false in that case.
    pub fn set(&mut self, key: &str, value: Option<Value>, meta: Option<Meta>) -> bool {
        let now = current_timestamp_ms();
        let value = value.filter(|v| !v.is_null());
        let (root, path) = split_path(key);
        let old = self.valid_block(root, now);

        let data = match &old {
            Some(old) if !path.is_empty() => {
                let mut data = old.data.clone();
                set_path(&mut data, &path, value);
                Some(data).filter(|d| !d.is_null())
            }
            _ => value,
        };

        let block = match data {
            Some(data) => {
                let fields = match meta {
                    Some(meta) => match normalize_meta(meta, now) {
                        Some(fields) => fields,
                        None => {
                            debug!("Not storing {}: metadata already expired", key);
                            return false;
                        }
                    },
                    None => Map::new(),
                };

                let mut block = wrap_at(data, fields, now);
                match &old {
                    Some(old) => {
                        let mut merged = old.meta.clone();
                        merged.extend(block.meta);
                        block.meta = merged;
                    }
                    None => {
                        if let Some(ttl) = self.default_ttl {
                            let expire = now.saturating_add(ttl.num_milliseconds());
                            block.meta.entry(EXPIRE).or_insert_with(|| Value::from(expire));
                        }
                    }
                }
                Some(block)
            }
            None => None,
        };

        // An expired block being deleted still counts as a change.
        let changed = block.is_some() || old.is_some() || self.storage.get(root).is_some();
        self.storage.set(root, block.map(Value::from));

        if changed {
            self.notifier.notify(key);
        }
        true
    }

    /// Deletes `key`.
    pub fn remove(&mut self, key: &str) {
        self.set(key, None, None);
    }

    // == Keys ==
    /// Keys whose block is currently valid. Expired entries are skipped,
    /// not deleted.
    pub fn keys(&self) -> Vec<String> {
        let now = current_timestamp_ms();
        self.storage
            .keys()
            .into_iter()
            .filter(|key| self.valid_block(key, now).is_some())
            .collect()
    }

    /// Number of valid entries.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Returns true if there is no valid entry.
    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    // == Clear ==
    /// Deletes every valid key, notifying each.
    pub fn clear(&mut self) {
        for key in self.keys() {
            self.remove(&key);
        }
    }

    /// Deletes exactly the given keys, notifying each that existed.
    pub fn clear_keys<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        for key in keys {
            self.remove(key.as_ref());
        }
    }

    // == Filter ==
    /// Valid keys for which `predicate(key, block, index, all_keys)` holds,
    /// in enumeration order.
    pub fn filter<F>(&self, mut predicate: F) -> Vec<String>
    where
        F: FnMut(&str, &Block, usize, &[String]) -> bool,
    {
        let keys = self.keys();
        let now = current_timestamp_ms();

        keys.iter()
            .enumerate()
            .filter_map(|(index, key)| {
                let block = self.valid_block(key, now)?;
                predicate(key.as_str(), &block, index, keys.as_slice()).then(|| key.clone())
            })
            .collect()
    }

    /// Keys whose meta field `field` is truthy.
    pub fn filter_by(&self, field: &str) -> Vec<String> {
        self.filter(|_, block, _, _| block.meta.get(field).is_some_and(is_truthy))
    }

    /// Keys whose meta field `field` equals `value`.
    pub fn filter_by_value(&self, field: &str, value: &Value) -> Vec<String> {
        self.filter(|_, block, _, _| block.meta.get(field) == Some(value))
    }

    // == Persistence ==
    /// Crosses the deferral boundary of the backing storage.
    pub fn flush(&mut self) -> usize {
        self.storage.flush()
    }

    /// Number of root keys waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.storage.pending()
    }

    // == Notifications ==
    /// Registers an observer of committed changes.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.notifier.subscribe(callback)
    }

    /// Removes an observer.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    // == Sweep ==
    fn sweep(&mut self) -> usize {
        let now = current_timestamp_ms();
        let stale: Vec<String> = self
            .storage
            .keys()
            .into_iter()
            .filter(|key| {
                !self
                    .storage
                    .get_root(key)
                    .and_then(Block::from_value)
                    .is_some_and(|block| check_valid(&block, now))
            })
            .collect();

        for key in &stale {
            self.storage.remove_root(key);
        }
        stale.len()
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
