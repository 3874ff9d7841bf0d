//! Durable Medium Module
//!
//! The contract a durable tier must satisfy plus an in-memory implementation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Result, StorageError};

static NEXT_MEDIUM_ID: AtomicU64 = AtomicU64::new(1);

// == Medium Identity ==
/// Identifies one medium instance, used to match external change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediumId(u64);

impl MediumId {
    /// Allocates a process-unique identity.
    pub fn next() -> Self {
        Self(NEXT_MEDIUM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

// == Durable Medium ==
/// Synchronous string-keyed store backing a storage's durable tier.
///
/// Implementations must not panic on failure: a rejected write or removal
/// is reported through the returned `Result` and the caller degrades to
/// memory-only operation.
pub trait DurableMedium: Send + Sync {
    /// Identity of this medium instance
    fn id(&self) -> MediumId;

    /// Reads the raw string stored under `key`
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`
    fn remove(&self, key: &str) -> Result<()>;

    /// Number of stored keys
    fn len(&self) -> usize;

    /// Key at `index`, for `0..len()`
    fn key_at(&self, index: usize) -> Option<String>;

    /// Returns true if the medium holds no keys
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored key, in positional order
    fn keys(&self) -> Vec<String> {
        (0..self.len()).filter_map(|i| self.key_at(i)).collect()
    }
}

// == Memory Medium ==
/// In-process durable medium.
///
/// Stands in for a host's persistent or per-session store. A byte quota and a
/// disabled switch reproduce the failure modes of restrictive hosts.
#[derive(Debug)]
pub struct MemoryMedium {
    id: MediumId,
    items: Mutex<BTreeMap<String, String>>,
    /// Maximum total bytes of keys plus values, None = unbounded
    quota: Option<usize>,
    disabled: AtomicBool,
}

impl MemoryMedium {
    // == Constructor ==
    /// Creates an empty, unbounded medium.
    pub fn new() -> Self {
        Self {
            id: MediumId::next(),
            items: Mutex::new(BTreeMap::new()),
            quota: None,
            disabled: AtomicBool::new(false),
        }
    }

    /// Creates an empty medium that refuses writes beyond `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            quota: Some(bytes),
            ..Self::new()
        }
    }

    /// Enables or disables the medium; a disabled medium refuses every write.
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    /// Total bytes of keys plus values currently stored.
    pub fn used_bytes(&self) -> usize {
        self.items()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    fn items(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_enabled(&self) -> Result<()> {
        if self.disabled.load(Ordering::SeqCst) {
            Err(StorageError::MediumUnavailable(
                "medium is disabled".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableMedium for MemoryMedium {
    fn id(&self) -> MediumId {
        self.id
    }

    fn get(&self, key: &str) -> Option<String> {
        self.items().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_enabled()?;
        let mut items = self.items();

        if let Some(limit) = self.quota {
            let used: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    limit,
                });
            }
        }

        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check_enabled()?;
        self.items().remove(key);
        Ok(())
    }

    fn len(&self) -> usize {
        self.items().len()
    }

    fn key_at(&self, index: usize) -> Option<String> {
        self.items().keys().nth(index).cloned()
    }
}
