//! Error types for the registry cache
//!
//! Provides structured error types for the read-through cache, the
//! write-invalidation path, configuration loading and the backing store
//! boundary.

use thiserror::Error;

/// Unified error type for the registry cache
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // =========================================================================
    // Access Errors
    // =========================================================================
    #[error("User {user} is not authorized to {action} the resource {path}")]
    AuthorizationFailed {
        user: String,
        path: String,
        action: String,
    },

    #[error("Tenant resolution failed: {0}")]
    TenantResolution(String),

    // =========================================================================
    // Backing Store Errors
    // =========================================================================
    #[error("Resource not found: {path}")]
    ResourceNotFound { path: String },

    #[error("Backing store operation failed: {operation}: {reason}")]
    BackingStore { operation: String, reason: String },

    // =========================================================================
    // Cache Store Errors
    // =========================================================================
    #[error("Cache store unavailable: {0}")]
    CacheStoreUnavailable(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a failed backing store call
    pub fn backing_store(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::BackingStore {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error originated in the backing store
    pub fn is_backing_store(&self) -> bool {
        matches!(
            self,
            Error::ResourceNotFound { .. } | Error::BackingStore { .. }
        )
    }

    /// Check if this error is a cache-layer failure that callers never see
    pub fn is_cache_failure(&self) -> bool {
        matches!(self, Error::CacheStoreUnavailable(_))
    }

    /// Check if this error is an access failure (authorization or tenant)
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            Error::AuthorizationFailed { .. } | Error::TenantResolution(_)
        )
    }

    /// Check if retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::BackingStore { .. } | Error::CacheStoreUnavailable(_) | Error::Io(_)
        )
    }
}

/// Result type alias for the registry cache
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = Error::ResourceNotFound {
            path: "/a".into(),
        };
        assert!(err.is_backing_store());
        assert!(!err.is_retryable());
        assert!(!err.is_cache_failure());

        let err = Error::backing_store("get", "connection reset");
        assert!(err.is_backing_store());
        assert!(err.is_retryable());

        let err = Error::CacheStoreUnavailable("down".into());
        assert!(err.is_cache_failure());
        assert!(!err.is_backing_store());
    }

    #[test]
    fn test_access_errors() {
        let err = Error::AuthorizationFailed {
            user: "bob".into(),
            path: "/secret".into(),
            action: "get".into(),
        };
        assert!(err.is_access_denied());
        assert_eq!(
            err.to_string(),
            "User bob is not authorized to get the resource /secret"
        );

        let err = Error::TenantResolution("no tenant".into());
        assert!(err.is_access_denied());
        assert!(!err.is_retryable());
    }
}
