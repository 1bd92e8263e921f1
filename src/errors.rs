//! Error types for the pacer system.

use thiserror::Error;

/// Crate-wide error type.
///
/// Subsystems with richer boundaries ([`crate::dispatch::DispatchError`],
/// [`crate::cache::CacheError`]) convert into this type when they cross the
/// facade.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PacerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Cache error: {0}")]
    CacheError(String),
    #[error("Dispatch error: {0}")]
    DispatchError(String),
    #[error("Task error: {0}")]
    TaskError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for PacerError {
    fn from(error: serde_json::Error) -> Self {
        PacerError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

pub type PacerResult<T> = anyhow::Result<T, PacerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PacerError::InvalidConfiguration("backoff_factor must be >= 1.0".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: backoff_factor must be >= 1.0"
        );
    }

    #[test]
    fn test_serde_json_error_converts() {
        let bad: Result<serde_json::Value, _> = serde_json::from_str("not json");
        let err: PacerError = bad.unwrap_err().into();
        assert!(matches!(err, PacerError::ValidationError(_)));
    }
}
