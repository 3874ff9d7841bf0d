//! Cache Module
//!
//! Expiring key-value cache layered on a namespaced storage.

mod engine;
mod entry;


// Re-export public types
pub use engine::CacheEngine;
pub use entry::{
    check_valid, current_timestamp_ms, normalize_meta, wrap, Block, Meta, EXPIRE, UPDATED,
};
