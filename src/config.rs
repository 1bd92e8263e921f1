//! Configuration for the mediation layer.
//!
//! All components are constructed from [`PacerConfig`], either built in code
//! (every struct has sensible `Default`s) or deserialized from a TOML file:
//!
//! ```toml
//! [dispatch.retry]
//! max_retries = 3
//! base_delay_ms = 250
//! max_delay_ms = 30000
//! backoff_factor = 2.0
//!
//! [cache]
//! enabled = true
//! url = "redis://localhost:6379"
//! default_ttl_seconds = 300
//!
//! [cache.categories]
//! transactional = 60
//! aggregate = 3600
//! ```

use crate::dispatch::RetryPolicy;
use crate::errors::{PacerError, PacerResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for [`crate::core::PacerCore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PacerConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Retry policy applied when a request is enqueued without its own.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry/backoff policy in wire-friendly units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts allowed for transient failures, including the first try.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Convert into the runtime policy value used by the dispatcher.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
        }
    }
}

/// Cache configuration.
///
/// When `url` is set and reachable at startup the remote backend is used;
/// otherwise the store silently degrades to the in-memory backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Remote backend connection string, e.g. `redis://localhost:6379`.
    pub url: Option<String>,
    /// TTL applied when no category or explicit TTL is given.
    pub default_ttl_seconds: u64,
    /// Open enumeration of TTL categories (seconds). Unknown categories fall
    /// back to `default_ttl_seconds`.
    #[serde(default)]
    pub categories: HashMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            default_ttl_seconds: 300,
            categories: HashMap::new(),
        }
    }
}

/// Supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Number of recent iteration durations retained per task (bounded memory).
    pub duration_window: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            duration_window: 50,
        }
    }
}

impl PacerConfig {
    /// Load configuration from a TOML file, with `PACER_*` environment
    /// variables overriding file values (e.g. `PACER_CACHE__URL`).
    pub fn from_file<P: AsRef<Path>>(path: P) -> PacerResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("PACER").separator("__"))
            .build()
            .map_err(|e| PacerError::InvalidConfiguration(e.to_string()))?;

        let parsed: PacerConfig = settings
            .try_deserialize()
            .map_err(|e| PacerError::InvalidConfiguration(e.to_string()))?;

        parsed.validate()?;
        Ok(parsed)
    }

    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> PacerResult<()> {
        let retry = &self.dispatch.retry;
        if retry.max_retries == 0 {
            return Err(PacerError::InvalidConfiguration(
                "dispatch.retry.max_retries must be at least 1 (it includes the first try)"
                    .to_string(),
            ));
        }
        if retry.backoff_factor < 1.0 {
            return Err(PacerError::InvalidConfiguration(
                "dispatch.retry.backoff_factor must be >= 1.0".to_string(),
            ));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(PacerError::InvalidConfiguration(
                "dispatch.retry.base_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }
        if self.cache.default_ttl_seconds == 0 {
            return Err(PacerError::InvalidConfiguration(
                "cache.default_ttl_seconds must be positive".to_string(),
            ));
        }
        for (name, ttl) in &self.cache.categories {
            if name.trim().is_empty() {
                return Err(PacerError::InvalidConfiguration(
                    "cache.categories contains an empty category name".to_string(),
                ));
            }
            if *ttl == 0 {
                return Err(PacerError::InvalidConfiguration(format!(
                    "cache.categories.{name} must have a positive TTL"
                )));
            }
        }
        if self.supervisor.duration_window == 0 {
            return Err(PacerError::InvalidConfiguration(
                "supervisor.duration_window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
