//! Error types for the cache engine.
//!
//! All failures are synchronous and local: an invalid configuration at
//! construction, an invalid TTL on insert, or an operation against a closed
//! cache. A silently rejected admission is a policy outcome, not an error,
//! and never surfaces here.

use thiserror::Error;

/// Result type alias using [`CacheError`].
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors returned by cache construction and mutating operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The configuration failed validation (e.g. a shard count that is
    /// neither zero nor a power of two).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A zero-length TTL was passed to `set`. Use `Ttl::Never` to store
    /// forever or `Ttl::Default` to fall through to the configured default.
    #[error("ttl must be a positive duration")]
    InvalidTtl,

    /// A mutating operation was attempted after `close()`.
    #[error("cache is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::InvalidConfig("shard_count must be a power of two".into());
        assert!(err.to_string().contains("power of two"));
        assert_eq!(CacheError::Closed.to_string(), "cache is closed");
        assert!(CacheError::InvalidTtl.to_string().contains("positive"));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(CacheError::Closed, CacheError::Closed);
        assert_ne!(CacheError::Closed, CacheError::InvalidTtl);
    }
}
