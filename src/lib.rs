//! Tiered Cache - An in-process key-value cache with durable persistence
//!
//! Provides per-entry expiration over namespaced storages whose writes are
//! replicated, deferred and coalesced, to an optional durable medium.

pub mod cache;
pub mod config;
pub mod error;
pub mod notify;
pub mod storage;
pub mod tasks;

pub use cache::{Block, CacheEngine, Meta};
pub use config::Config;
pub use error::{Result, StorageError};
pub use notify::{ChangeHub, ExternalChange, Notifier, SubscriptionId};
pub use storage::{DurableMedium, MediumId, MemoryMedium, Storage, StorageRegistry};
pub use tasks::{spawn_flush_task, SharedCache};
