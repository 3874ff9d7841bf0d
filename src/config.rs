//! Configuration Module
//!
//! Handles loading cache engine configuration from environment variables.

use std::env;

/// Cache engine configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace of the storage backing the cache engine
    pub namespace: String,
    /// Interval in milliseconds between background flushes of deferred writes
    pub flush_interval_ms: u64,
    /// Expiry in seconds applied to new entries created without one, None = never
    pub default_ttl: Option<u64>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_NAMESPACE` - Namespace of the cache storage (default: cache)
    /// - `FLUSH_INTERVAL_MS` - Background flush interval in ms (default: 50)
    /// - `DEFAULT_TTL` - Default expiry in seconds for new entries (default: unset)
    pub fn from_env() -> Self {
        Self {
            namespace: env::var("CACHE_NAMESPACE")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "cache".to_string()),
            flush_interval_ms: env::var("FLUSH_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            default_ttl: env::var("DEFAULT_TTL")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "cache".to_string(),
            flush_interval_ms: 50,
            default_ttl: None,
        }
    }
}
