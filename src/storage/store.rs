//! Storage Module
//!
//! The fast tier: an in-memory map of namespaced keys, optionally replicated
//! to a durable medium through deferred, coalesced writes.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::notify::{ChangeHub, ExternalChange, Notifier, Registration, SubscriptionId};
use crate::storage::codec::{deserialize_key, deserialize_value, serialize_key, serialize_value};
use crate::storage::path::{get_path, set_path, split_path};
use crate::storage::{DurableMedium, MediumId};

// == Storage ==
/// A namespaced key-value store.
///
/// Reads are served from memory only. Every mutation is applied to memory
/// immediately and, when a medium is configured, queues its root key for the
/// next [`Storage::flush`]. Several mutations of one root between two flushes
/// reach the medium as a single write of the final state.
pub struct Storage {
    /// Namespace prefixed to every logical key
    namespace: String,
    /// Root physical key -> value
    content: BTreeMap<String, Value>,
    /// Durable tier, if any
    medium: Option<Arc<dyn DurableMedium>>,
    /// Root physical keys touched since the last flush, first-touched order
    pending: Vec<String>,
    /// Membership index for `pending`
    queued: HashSet<String>,
    /// Observers of external changes
    notifier: Arc<Notifier>,
    /// Keeps the external change listener alive
    registration: Option<Registration>,
}

impl Storage {
    // == Constructors ==
    /// Creates a memory-only storage.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self::open(namespace, None, None)
    }

    /// Creates a storage backed by `medium` and seeds it from the keys the
    /// medium already holds for this namespace.
    pub fn with_medium(namespace: impl Into<String>, medium: Arc<dyn DurableMedium>) -> Self {
        Self::open(namespace, Some(medium), None)
    }

    /// General constructor.
    ///
    /// With a medium, the medium is enumerated once and every key of this
    /// namespace is loaded into memory. With a hub as well, the storage
    /// listens for external changes of that medium until dropped.
    pub fn open(
        namespace: impl Into<String>,
        medium: Option<Arc<dyn DurableMedium>>,
        hub: Option<&Arc<ChangeHub>>,
    ) -> Self {
        let namespace = namespace.into();
        let notifier = Arc::new(Notifier::new());

        let content = medium
            .as_deref()
            .map(|m| load(&namespace, m))
            .unwrap_or_default();

        let registration = match (hub, medium.as_deref()) {
            (Some(hub), Some(m)) => {
                let origin = m.id();
                let ns = namespace.clone();
                let sink = Arc::clone(&notifier);
                Some(hub.listen(move |event| republish(&sink, &ns, origin, event)))
            }
            _ => None,
        };

        Self {
            namespace,
            content,
            medium,
            pending: Vec::new(),
            queued: HashSet::new(),
            notifier,
            registration,
        }
    }

    // == Presets ==
    /// Memory-only storage, namespace `memory`.
    pub fn memory() -> Self {
        Self::new("memory")
    }

    /// Persistent storage, namespace `local`.
    pub fn local(medium: Arc<dyn DurableMedium>, hub: Option<&Arc<ChangeHub>>) -> Self {
        Self::open("local", Some(medium), hub)
    }

    /// Per-session storage, namespace `session`.
    pub fn session(medium: Arc<dyn DurableMedium>, hub: Option<&Arc<ChangeHub>>) -> Self {
        Self::open("session", Some(medium), hub)
    }

    /// Storage backing the cache engine, namespace `cache`.
    pub fn cache(medium: Arc<dyn DurableMedium>, hub: Option<&Arc<ChangeHub>>) -> Self {
        Self::open("cache", Some(medium), hub)
    }

    // == Accessors ==
    /// Namespace of this storage.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns true if a durable medium is configured.
    pub fn is_durable(&self) -> bool {
        self.medium.is_some()
    }

    /// Returns true if this storage listens for external changes.
    pub fn is_listening(&self) -> bool {
        self.registration.is_some()
    }

    /// Number of root keys waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    // == Get ==
    /// Returns the value under `key`, from memory only.
    ///
    /// A dotted key resolves a field inside its root value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let physical = serialize_key(key, &self.namespace);
        let (root, path) = split_path(&physical);

        self.content
            .get(root)
            .and_then(|value| get_path(value, &path))
    }

    /// Returns the value stored under `key` taken whole, dots included.
    pub fn get_root(&self, key: &str) -> Option<&Value> {
        self.content.get(&serialize_key(key, &self.namespace))
    }

    /// Returns true if `key` holds a value.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    // == Set ==
    /// Stores `value` under `key`, or deletes the key when `value` is None
    /// or null.
    ///
    /// A dotted key updates (or removes) a field inside its root value. The
    /// durable write, if any, is deferred to the next [`Storage::flush`] and
    /// always covers the whole root.
    pub fn set(&mut self, key: &str, value: Option<Value>) {
        let value = value.filter(|v| !v.is_null());
        let physical = serialize_key(key, &self.namespace);
        let (root, path) = split_path(&physical);
        let root = root.to_string();

        if path.is_empty() {
            match value {
                Some(value) => {
                    self.content.insert(root.clone(), value);
                }
                None => {
                    self.content.remove(&root);
                }
            }
        } else {
            match value {
                Some(value) => {
                    let target = self
                        .content
                        .entry(root.clone())
                        .or_insert(Value::Null);
                    set_path(target, &path, Some(value));
                }
                None => {
                    if let Some(target) = self.content.get_mut(&root) {
                        set_path(target, &path, None);
                    }
                }
            }
        }

        self.schedule(root);
    }

    /// Deletes the entry stored under `key` taken whole, dots included.
    ///
    /// Used for entries whose logical key contains a `.`, which [`Storage::set`]
    /// would read as a field path.
    pub fn remove_root(&mut self, key: &str) {
        let physical = serialize_key(key, &self.namespace);
        self.content.remove(&physical);
        self.schedule(physical);
    }

    /// Applies several writes in order.
    pub fn set_many<I, K>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, Option<Value>)>,
        K: AsRef<str>,
    {
        for (key, value) in entries {
            self.set(key.as_ref(), value);
        }
    }

    // == Keys ==
    /// Logical keys of this namespace held in memory or in the medium,
    /// deduplicated, memory keys first.
    pub fn keys(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();

        let durable = self
            .medium
            .as_deref()
            .map(|m| m.keys())
            .unwrap_or_default();

        for physical in self.content.keys().chain(durable.iter()) {
            let parts = deserialize_key(physical);
            if parts.namespace == self.namespace && seen.insert(parts.key.clone()) {
                keys.push(parts.key);
            }
        }

        keys
    }

    /// Returns the number of keys of this namespace.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Returns true if this namespace holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    // == Clear ==
    /// Deletes every key of this namespace, in memory and (after the next
    /// flush) in the medium.
    pub fn clear(&mut self) {
        for key in self.keys() {
            self.remove_root(&key);
        }
    }

    // == Flush ==
    /// Crosses the deferral boundary: writes the current value of every
    /// queued root key to the medium, or removes it if it no longer exists.
    ///
    /// Failures are logged and skipped; memory stays authoritative. Returns
    /// the number of keys that reached the medium.
    pub fn flush(&mut self) -> usize {
        let Some(medium) = self.medium.clone() else {
            return 0;
        };

        let pending = std::mem::take(&mut self.pending);
        self.queued.clear();

        let mut written = 0;
        for key in pending {
            let result = match self.content.get(&key) {
                Some(value) => match serialize_value(value) {
                    Ok(raw) => medium.set(&key, &raw),
                    Err(e) => {
                        warn!("Skipping durable write of {}: {}", key, e);
                        continue;
                    }
                },
                None => medium.remove(&key),
            };

            match result {
                Ok(()) => written += 1,
                Err(e) => warn!("Durable medium rejected {}: {}", key, e),
            }
        }

        if written > 0 {
            debug!("Flushed {} keys of namespace {}", written, self.namespace);
        }
        written
    }

    // == Notifications ==
    /// Registers an observer of external changes to this namespace.
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

    /// Re-publishes an external change as a logical-key notification when
    /// it concerns this namespace of this storage's medium.
    ///
    /// Memory is not resynchronized; observers decide what to do.
    pub fn on_external_change(&self, event: &ExternalChange) {
        if let Some(medium) = self.medium.as_deref() {
            republish(&self.notifier, &self.namespace, medium.id(), event);
        }
    }

    fn schedule(&mut self, root: String) {
        if self.medium.is_some() && self.queued.insert(root.clone()) {
            self.pending.push(root);
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            self.flush();
        }
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("namespace", &self.namespace)
            .field("entries", &self.content.len())
            .field("durable", &self.medium.is_some())
            .field("pending", &self.pending.len())
            .finish()
    }
}

// == Helpers ==
/// Reads every key of `namespace` out of `medium`.
fn load(namespace: &str, medium: &dyn DurableMedium) -> BTreeMap<String, Value> {
    let mut content = BTreeMap::new();

    for physical in medium.keys() {
        if deserialize_key(&physical).namespace != namespace {
            continue;
        }
        if let Some(raw) = medium.get(&physical) {
            let value = deserialize_value(&raw);
            if !value.is_null() {
                content.insert(physical, value);
            }
        }
    }

    info!(
        "Loaded {} entries for namespace {} from durable medium",
        content.len(),
        namespace
    );
    content
}

fn republish(notifier: &Notifier, namespace: &str, origin: MediumId, event: &ExternalChange) {
    if let Some(key) = external_key(namespace, origin, event) {
        notifier.notify(&key);
    }
}

/// Logical key an external change maps to, if it concerns `namespace` of
/// medium `origin`.
fn external_key(namespace: &str, origin: MediumId, event: &ExternalChange) -> Option<String> {
    if event.origin != origin {
        return None;
    }
    let parts = deserialize_key(event.key.as_deref()?);
    (parts.namespace == namespace).then_some(parts.key)
}
