//! Storage Module
//!
//! Namespaced fast-tier storages over an optional durable medium.

pub mod codec;
mod medium;
pub mod path;
mod registry;
mod store;

// Re-export public types
pub use codec::{deserialize_key, deserialize_value, serialize_key, serialize_value, KeyParts};
pub use medium::{DurableMedium, MediumId, MemoryMedium};
pub use registry::{StorageRegistry, CACHE, LOCAL, MEMORY, SESSION};
pub use store::Storage;
