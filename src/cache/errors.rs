//! Cache error types

use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to connect to the cache backend
    #[error("Cache connection error: {0}")]
    ConnectionError(String),

    /// Failed to serialize or deserialize a cache value
    #[error("Cache serialization error: {0}")]
    SerializationError(String),

    /// Generic backend error
    #[error("Cache backend error: {0}")]
    BackendError(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

impl From<CacheError> for crate::errors::PacerError {
    fn from(e: CacheError) -> Self {
        crate::errors::PacerError::CacheError(e.to_string())
    }
}
