//! Storage Registry
//!
//! Resolves storages by name. An unknown name is a configuration error and
//! is reported immediately.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::error;

use crate::error::{Result, StorageError};
use crate::notify::ChangeHub;
use crate::storage::{DurableMedium, Storage};

type Factory = Box<dyn Fn() -> Storage + Send + Sync>;

// == Public Constants ==
/// Name of the memory-only storage
pub const MEMORY: &str = "memory";
/// Name of the persistent storage
pub const LOCAL: &str = "local";
/// Name of the per-session storage
pub const SESSION: &str = "session";
/// Name of the storage backing the cache engine
pub const CACHE: &str = "cache";

// == Storage Registry ==
/// Name -> storage factory lookup.
#[derive(Default)]
pub struct StorageRegistry {
    factories: BTreeMap<String, Factory>,
}

impl StorageRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four standard storages.
    ///
    /// `local` and `cache` share the persistent medium; `session` uses the
    /// per-session one. All durable storages listen on `hub` if given.
    pub fn with_defaults(
        persistent: Arc<dyn DurableMedium>,
        per_session: Arc<dyn DurableMedium>,
        hub: Option<Arc<ChangeHub>>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(MEMORY, Storage::memory);

        let (medium, events) = (persistent.clone(), hub.clone());
        registry.register(LOCAL, move || Storage::local(medium.clone(), events.as_ref()));

        let (medium, events) = (per_session, hub.clone());
        registry.register(SESSION, move || {
            Storage::session(medium.clone(), events.as_ref())
        });

        registry.register(CACHE, move || Storage::cache(persistent.clone(), hub.as_ref()));
        registry
    }

    /// Registers (or replaces) the factory for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Storage + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Returns true if `name` can be resolved.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Builds the storage registered under `name`.
    pub fn storage_for(&self, name: &str) -> Result<Storage> {
        match self.factories.get(name) {
            Some(factory) => Ok(factory()),
            None => {
                error!("A storage was not found for type {}", name);
                Err(StorageError::NotFound(name.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryMedium;

    fn registry() -> StorageRegistry {
        StorageRegistry::with_defaults(
            Arc::new(MemoryMedium::new()),
            Arc::new(MemoryMedium::new()),
            None,
        )
    }

    #[test]
    fn test_defaults_are_registered() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["cache", "local", "memory", "session"]);

        assert_eq!(registry.storage_for(MEMORY).unwrap().namespace(), "memory");
        assert_eq!(registry.storage_for(LOCAL).unwrap().namespace(), "local");
        assert_eq!(registry.storage_for(SESSION).unwrap().namespace(), "session");
        assert_eq!(registry.storage_for(CACHE).unwrap().namespace(), "cache");
    }

    #[test]
    fn test_memory_storage_is_not_durable() {
        let registry = registry();
        assert!(!registry.storage_for(MEMORY).unwrap().is_durable());
        assert!(registry.storage_for(LOCAL).unwrap().is_durable());
    }

    #[test]
    fn test_unknown_storage_fails_fast() {
        let registry = registry();
        let result = registry.storage_for("bogus");
        assert_eq!(
            result.unwrap_err(),
            StorageError::NotFound("bogus".to_string())
        );
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = StorageRegistry::new();
        registry.register("prefs", || Storage::new("prefs"));

        assert!(registry.contains("prefs"));
        assert_eq!(registry.storage_for("prefs").unwrap().namespace(), "prefs");
    }
}
