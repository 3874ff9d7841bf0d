//! Error types for the storage and cache layers
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Storage Error Enum ==
/// Unified error type for storages and the cache engine.
///
/// Only [`StorageError::NotFound`] ever reaches a caller of the public
/// read/write API. The remaining variants describe durable-tier failures that
/// are recovered locally: the in-memory tier stays authoritative and the
/// failure is logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A named storage could not be resolved
    #[error("A storage was not found for type {0}")]
    NotFound(String),

    /// Value could not be turned into a durable string
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Durable medium rejected the operation or is disabled
    #[error("Durable medium unavailable: {0}")]
    MediumUnavailable(String),

    /// Durable medium ran out of space
    #[error("Quota exceeded while writing {key} (limit {limit} bytes)")]
    QuotaExceeded { key: String, limit: usize },
}

// == Result Type Alias ==
/// Convenience Result type for the storage layer.
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_the_type() {
        let err = StorageError::NotFound("bogus".to_string());
        assert_eq!(err.to_string(), "A storage was not found for type bogus");
    }

    #[test]
    fn test_quota_message() {
        let err = StorageError::QuotaExceeded {
            key: "local:foo".to_string(),
            limit: 16,
        };
        assert!(err.to_string().contains("local:foo"));
        assert!(err.to_string().contains("16"));
    }
}
