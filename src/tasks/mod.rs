//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside the cache.
//!
//! # Tasks
//! - Flush: Crosses the deferral boundary so queued durable writes land

mod flush;

pub use flush::{spawn_flush_task, SharedCache};
