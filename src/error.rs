//! Cache error types.

use std::io;
use thiserror::Error;

/// Cache operation errors.
#[derive(Error, Debug)]
pub enum CacheError {
    /// I/O error during a storage operation
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stored entry could not be serialized or deserialized
    #[error("Malformed cache entry: {0}")]
    Entry(#[from] serde_json::Error),

    /// Key not found
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Storage backend error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Redis error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Object store error
    #[cfg(feature = "s3")]
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Check if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            CacheError::NotFound(_) => true,
            CacheError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            #[cfg(feature = "s3")]
            CacheError::ObjectStore(object_store::Error::NotFound { .. }) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        let err = CacheError::NotFound("index//index".to_string());
        assert!(err.is_not_found());

        let io_err = CacheError::Io(io::Error::new(io::ErrorKind::NotFound, "not found"));
        assert!(io_err.is_not_found());

        let backend = CacheError::Backend("connection refused".to_string());
        assert!(!backend.is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = CacheError::NotFound("blog/post-1".to_string());
        assert_eq!(err.to_string(), "Key not found: blog/post-1");
    }
}
