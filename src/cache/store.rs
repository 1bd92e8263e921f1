//! Cache store with backend selection and read-through semantics
//!
//! The backend decision happens exactly once, at construction: a configured
//! and reachable remote backend wins, anything else degrades to the
//! in-memory service. Consumers use `CacheStore` and never see which
//! backend is underneath.

use super::errors::{CacheError, CacheResult};
use super::providers::MemoryCacheService;
use super::traits::CacheService;
use crate::config::CacheConfig;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(feature = "cache-redis")]
use super::providers::RedisCacheService;

/// TTL selector accepted wherever the cache takes an expiry.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Ttl {
    /// The store's configured default TTL.
    #[default]
    Default,
    /// An explicit duration.
    Exact(Duration),
    /// A named category from configuration; unknown names use the default.
    Category(String),
}

impl From<Duration> for Ttl {
    fn from(d: Duration) -> Self {
        Ttl::Exact(d)
    }
}

impl From<&str> for Ttl {
    fn from(category: &str) -> Self {
        Ttl::Category(category.to_string())
    }
}

/// Internal cache backend enum for zero-cost dispatch
///
/// This is an implementation detail. Consumers should use `CacheStore`.
#[derive(Debug)]
enum CacheBackend {
    /// Redis cache provider (boxed to reduce enum size)
    #[cfg(feature = "cache-redis")]
    Redis(Box<RedisCacheService>),

    /// In-memory fallback provider
    Memory(MemoryCacheService),
}

impl CacheBackend {
    fn provider_name(&self) -> &'static str {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.provider_name(),
            Self::Memory(s) => s.provider_name(),
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.get(key).await,
            Self::Memory(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.set(key, value, ttl).await,
            Self::Memory(s) => s.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.delete(key).await,
            Self::Memory(s) => s.delete(key).await,
        }
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.exists(key).await,
            Self::Memory(s) => s.exists(key).await,
        }
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Duration) -> CacheResult<i64> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.increment(key, amount, ttl).await,
            Self::Memory(s) => s.increment(key, amount, ttl).await,
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.delete_pattern(pattern).await,
            Self::Memory(s) => s.delete_pattern(pattern).await,
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.health_check().await,
            Self::Memory(s) => s.health_check().await,
        }
    }
}

/// TTL cache with category defaults, hit/miss accounting, and read-through
/// population.
///
/// Values are JSON (`serde_json::Value`), stored as compact strings in the
/// backend; both backends persist the same shape.
#[derive(Debug)]
pub struct CacheStore {
    backend: CacheBackend,
    default_ttl: Duration,
    categories: HashMap<String, Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStore {
    /// Build a store from configuration with graceful degradation.
    ///
    /// If a remote URL is configured but unreachable, logs a warning and
    /// falls back to the in-memory backend. Startup never fails on cache
    /// trouble.
    pub async fn connect(config: &CacheConfig) -> Self {
        let backend = Self::create_backend(config).await;
        info!(
            backend = backend.provider_name(),
            default_ttl_seconds = config.default_ttl_seconds,
            "Cache store initialized"
        );

        Self {
            backend,
            default_ttl: Duration::from_secs(config.default_ttl_seconds),
            categories: config
                .categories
                .iter()
                .map(|(name, secs)| (name.clone(), Duration::from_secs(*secs)))
                .collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    async fn create_backend(config: &CacheConfig) -> CacheBackend {
        if !config.enabled {
            info!("Remote cache disabled by configuration, using in-memory backend");
            return CacheBackend::Memory(MemoryCacheService::new());
        }

        #[cfg(feature = "cache-redis")]
        if let Some(url) = &config.url {
            match RedisCacheService::connect(url).await {
                Ok(service) => {
                    info!(backend = "redis", "Remote cache backend connected");
                    return CacheBackend::Redis(Box::new(service));
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "Remote cache unreachable, falling back to in-memory backend"
                    );
                }
            }
        }

        #[cfg(not(feature = "cache-redis"))]
        if config.url.is_some() {
            warn!("Remote cache configured but 'cache-redis' feature not enabled, using in-memory backend");
        }

        CacheBackend::Memory(MemoryCacheService::new())
    }

    /// Resolve a TTL selector against configuration.
    pub fn resolve_ttl(&self, ttl: &Ttl) -> Duration {
        match ttl {
            Ttl::Default => self.default_ttl,
            Ttl::Exact(d) => *d,
            Ttl::Category(name) => match self.categories.get(name) {
                Some(d) => *d,
                None => {
                    debug!(category = name.as_str(), "Unknown TTL category, using default");
                    self.default_ttl
                }
            },
        }
    }

    /// Get a value. Expired entries are misses.
    pub async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        match self.backend.get(key).await? {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .map_err(|e| CacheError::SerializationError(e.to_string()))?;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Set a value with a TTL selector.
    pub async fn set(&self, key: &str, value: &Value, ttl: impl Into<Ttl>) -> CacheResult<()> {
        let ttl = self.resolve_ttl(&ttl.into());
        self.backend.set(key, &value.to_string(), ttl).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.backend.delete(key).await
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.backend.exists(key).await
    }

    /// Atomic counter increment; see [`CacheService::increment`].
    pub async fn increment(
        &self,
        key: &str,
        amount: i64,
        ttl: impl Into<Ttl>,
    ) -> CacheResult<i64> {
        let ttl = self.resolve_ttl(&ttl.into());
        self.backend.increment(key, amount, ttl).await
    }

    /// Delete all keys matching a glob pattern, returning the count removed.
    pub async fn clear_pattern(&self, pattern: &str) -> CacheResult<u64> {
        self.backend.delete_pattern(pattern).await
    }

    /// Read-through: return the cached value if present and unexpired,
    /// otherwise run `loader`, store its result, and return it.
    ///
    /// Concurrent misses on the same key are NOT deduplicated: each caller
    /// that observes a miss invokes its own loader. Backend errors around
    /// the loader are logged and treated as a miss/skipped write; only the
    /// loader's own error propagates.
    pub async fn fetch_or_populate<F, Fut>(
        &self,
        key: &str,
        ttl: impl Into<Ttl>,
        loader: F,
    ) -> CacheResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Value>>,
    {
        let ttl = ttl.into();
        match self.get(key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => {
                warn!(key = key, error = %e, "Cache read failed, treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }

        let value = loader().await?;

        if let Err(e) = self.set(key, &value, ttl).await {
            warn!(key = key, error = %e, "Cache write failed, returning loaded value");
        }
        Ok(value)
    }

    pub async fn health_check(&self) -> CacheResult<bool> {
        self.backend.health_check().await
    }

    pub fn provider_name(&self) -> &'static str {
        self.backend.provider_name()
    }

    /// Whether the store degraded to (or was configured for) in-memory.
    pub fn is_in_memory(&self) -> bool {
        matches!(self.backend, CacheBackend::Memory(_))
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn memory_config() -> CacheConfig {
        CacheConfig {
            enabled: true,
            url: None,
            default_ttl_seconds: 300,
            categories: HashMap::from([
                ("transactional".to_string(), 60),
                ("aggregate".to_string(), 3600),
            ]),
        }
    }

    #[tokio::test]
    async fn test_connect_without_url_uses_memory() {
        let store = CacheStore::connect(&memory_config()).await;
        assert!(store.is_in_memory());
        assert_eq!(store.provider_name(), "memory");
        assert!(store.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_with_unreachable_url_degrades() {
        let mut config = memory_config();
        // Nothing listens here; connect must degrade, not fail.
        config.url = Some("redis://127.0.0.1:1".to_string());
        let store = CacheStore::connect(&config).await;
        assert!(store.is_in_memory());
    }

    #[tokio::test]
    async fn test_set_get_round_trip_counts_hit() {
        let store = CacheStore::connect(&memory_config()).await;
        store
            .set("player:7", &json!({"gold": 120}), Ttl::Default)
            .await
            .unwrap();

        let value = store.get("player:7").await.unwrap().unwrap();
        assert_eq!(value["gold"], 120);
        assert_eq!(store.hit_count(), 1);
        assert_eq!(store.miss_count(), 0);
    }

    #[tokio::test]
    async fn test_get_absent_counts_miss() {
        let store = CacheStore::connect(&memory_config()).await;
        assert!(store.get("nope").await.unwrap().is_none());
        assert_eq!(store.miss_count(), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_observed_at_read() {
        let store = CacheStore::connect(&memory_config()).await;
        store
            .set("k", &json!("v"), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(110)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_category_resolution() {
        let store = CacheStore::connect(&memory_config()).await;
        assert_eq!(
            store.resolve_ttl(&Ttl::Category("transactional".to_string())),
            Duration::from_secs(60)
        );
        assert_eq!(
            store.resolve_ttl(&Ttl::Category("aggregate".to_string())),
            Duration::from_secs(3600)
        );
        // Unknown categories fall back to the default.
        assert_eq!(
            store.resolve_ttl(&Ttl::Category("mystery".to_string())),
            Duration::from_secs(300)
        );
        assert_eq!(store.resolve_ttl(&Ttl::Default), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_fetch_or_populate_loads_once_for_sequential_reads() {
        let store = CacheStore::connect(&memory_config()).await;
        let loads = AtomicU32::new(0);

        for _ in 0..3 {
            let value = store
                .fetch_or_populate("guild:1:stats", Ttl::Default, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"members": 42}))
                })
                .await
                .unwrap();
            assert_eq!(value["members"], 42);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(store.hit_count(), 2);
        assert_eq!(store.miss_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_or_populate_propagates_loader_error() {
        let store = CacheStore::connect(&memory_config()).await;
        let result = store
            .fetch_or_populate("bad", Ttl::Default, || async {
                Err(CacheError::BackendError("loader blew up".to_string()))
            })
            .await;
        assert!(result.is_err());
        // Nothing was stored for the failed load.
        assert!(store.get("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_increment_and_clear_pattern_via_store() {
        let store = CacheStore::connect(&memory_config()).await;
        assert_eq!(store.increment("hits:today", 2, Ttl::Default).await.unwrap(), 2);
        assert_eq!(store.increment("hits:today", 3, Ttl::Default).await.unwrap(), 5);

        store.set("s:1", &json!(1), Ttl::Default).await.unwrap();
        store.set("s:2", &json!(2), Ttl::Default).await.unwrap();
        assert_eq!(store.clear_pattern("s:*").await.unwrap(), 2);
        assert!(!store.exists("s:1").await.unwrap());
    }

    // Exercises the live remote backend when one is present; silently
    // passes otherwise so CI without Redis stays green.
    #[cfg(feature = "cache-redis")]
    #[tokio::test]
    async fn test_remote_backend_round_trip_when_available() {
        let mut config = memory_config();
        config.url = Some(
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        );
        let store = CacheStore::connect(&config).await;
        if store.is_in_memory() {
            return; // no server reachable, covered by the degrade test
        }

        let key = format!("pacer:test:{}", std::process::id());
        store.set(&key, &json!({"ok": true}), Ttl::Default).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().unwrap()["ok"], true);
        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }

    // A counter whose value wanders back to exactly the increment amount
    // must keep the expiry from its creation, not get a fresh one.
    #[cfg(feature = "cache-redis")]
    #[tokio::test]
    async fn test_remote_counter_keeps_original_expiry_when_available() {
        let mut config = memory_config();
        config.url = Some(
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        );
        let store = CacheStore::connect(&config).await;
        if store.is_in_memory() {
            return; // no server reachable, covered by the degrade test
        }

        let key = format!("pacer:test:ctr:{}", std::process::id());
        let _ = store.clear_pattern(&key).await;

        let ttl = Duration::from_secs(2);
        assert_eq!(store.increment(&key, 5, ttl).await.unwrap(), 5);
        tokio::time::sleep(Duration::from_millis(1_200)).await;

        // Back down and up so the next result equals the amount again.
        assert_eq!(store.increment(&key, -5, ttl).await.unwrap(), 0);
        assert_eq!(store.increment(&key, 5, ttl).await.unwrap(), 5);

        // Past the original expiry the counter is gone; a refreshed TTL
        // would still have most of a second left here.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(!store.exists(&key).await.unwrap());
    }
}
