//! Deferred Write Flush Task
//!
//! Background task that periodically writes queued changes to the durable
//! medium.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheEngine;

/// Cache engine shared between tasks.
pub type SharedCache = Arc<RwLock<CacheEngine>>;

/// Spawns a background task that flushes the cache's deferred writes.
///
/// Every mutation made while holding the write lock between two ticks forms
/// one burst: only its final state per key reaches the medium.
///
/// # Arguments
/// * `cache` - shared reference to the cache engine
/// * `flush_interval_ms` - Interval in milliseconds between flushes
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(RwLock::new(CacheEngine::new(storage)));
/// let flush_handle = spawn_flush_task(cache.clone(), 50);
/// // Later, during shutdown:
/// flush_handle.abort();
/// ```
pub fn spawn_flush_task(cache: SharedCache, flush_interval_ms: u64) -> JoinHandle<()> {
    let interval = Duration::from_millis(flush_interval_ms.max(1));

    tokio::spawn(async move {
        info!(
            "Starting flush task with interval of {} ms",
            flush_interval_ms
        );

        loop {
            tokio::time::sleep(interval).await;

            let written = {
                let mut cache_guard = cache.write().await;
                if cache_guard.pending() == 0 {
                    continue;
                }
                cache_guard.flush()
            };

            debug!("Flush task: wrote {} keys", written);
        }
    })
}
