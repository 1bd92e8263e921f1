//! Cache service trait definition

use super::errors::CacheResult;
use std::time::Duration;

/// Trait defining cache operations
///
/// Implemented by concrete cache providers (Redis, in-memory).
/// All operations are async and return `CacheResult` for error handling.
pub trait CacheService: Send + Sync {
    /// Get a value from the cache by key
    ///
    /// Returns `Ok(Some(value))` on cache hit, `Ok(None)` on cache miss.
    /// An expired entry is never returned.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = CacheResult<Option<String>>> + Send;

    /// Set a value in the cache with a TTL
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Delete a specific key from the cache
    fn delete(&self, key: &str) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Check whether a key exists and is unexpired
    fn exists(&self, key: &str) -> impl std::future::Future<Output = CacheResult<bool>> + Send;

    /// Atomically add `amount` to the integer counter at `key`.
    ///
    /// A missing or expired key starts from zero. The TTL applies only when
    /// the counter is created fresh; later increments keep the original
    /// expiry.
    fn increment(
        &self,
        key: &str,
        amount: i64,
        ttl: Duration,
    ) -> impl std::future::Future<Output = CacheResult<i64>> + Send;

    /// Delete all keys matching a glob pattern, returning how many went away
    fn delete_pattern(
        &self,
        pattern: &str,
    ) -> impl std::future::Future<Output = CacheResult<u64>> + Send;

    /// Check if the cache backend is healthy
    fn health_check(&self) -> impl std::future::Future<Output = CacheResult<bool>> + Send;

    /// Get the name of the cache provider
    fn provider_name(&self) -> &'static str;
}
