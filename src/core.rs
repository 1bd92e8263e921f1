//! Top-level facade tying the rate limiter, dispatcher, cache, and
//! supervisor together behind one handle.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::{CacheResult, CacheStore, Ttl};
use crate::config::PacerConfig;
use crate::dispatch::{DispatchStats, PendingCall, RequestDispatcher, RetryPolicy, UpstreamCall};
use crate::errors::PacerResult;
use crate::rate_limit::RateLimitState;
use crate::supervisor::{PeriodicJob, TaskRecord, TaskSupervisor};

/// Point-in-time view across every subsystem, safe to serialize into a
/// health or diagnostics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub dispatch: DispatchStats,
    pub queue_depths: HashMap<String, usize>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_provider: &'static str,
    pub lockout_active: bool,
    pub lockout_remaining_ms: u64,
    pub tracked_resources: usize,
    pub tasks: HashMap<String, TaskRecord>,
}

/// One handle per upstream provider account.
///
/// Construction never fails on degraded infrastructure: an unreachable
/// cache backend falls back to in-memory storage, and the dispatcher
/// spawns consumers lazily. Only invalid configuration is an error.
pub struct PacerCore {
    limits: Arc<RateLimitState>,
    dispatcher: RequestDispatcher,
    cache: Arc<CacheStore>,
    supervisor: TaskSupervisor,
}

impl PacerCore {
    pub async fn from_config(config: &PacerConfig) -> PacerResult<Self> {
        config.validate()?;
        let limits = Arc::new(RateLimitState::new());
        let dispatcher =
            RequestDispatcher::new(limits.clone(), config.dispatch.retry.to_policy());
        let cache = Arc::new(CacheStore::connect(&config.cache).await);
        let supervisor = TaskSupervisor::with_duration_window(config.supervisor.duration_window);
        info!(
            cache_provider = cache.provider_name(),
            "Pacer core initialized"
        );
        Ok(Self {
            limits,
            dispatcher,
            cache,
            supervisor,
        })
    }

    /// Queue an outbound call behind everything pending for `resource`.
    pub fn queue(&self, resource: &str, call: Arc<dyn UpstreamCall>) -> PendingCall {
        self.dispatcher.enqueue(resource, call)
    }

    /// Queue with a request-specific retry policy instead of the configured
    /// default.
    pub fn queue_with_policy(
        &self,
        resource: &str,
        call: Arc<dyn UpstreamCall>,
        policy: RetryPolicy,
    ) -> PendingCall {
        self.dispatcher.enqueue_with_policy(resource, call, policy)
    }

    /// Read-through cache access; see [`CacheStore::fetch_or_populate`].
    pub async fn cached<F, Fut>(
        &self,
        key: &str,
        ttl: impl Into<Ttl>,
        loader: F,
    ) -> PacerResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Value>>,
    {
        Ok(self.cache.fetch_or_populate(key, ttl, loader).await?)
    }

    /// Direct access to the cache for get/set/delete/increment operations.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Shared rate-limit state, useful for probes and tests.
    pub fn limits(&self) -> &RateLimitState {
        &self.limits
    }

    /// Register a named periodic job; replaces any job with the same name.
    pub fn schedule(&self, name: &str, interval: Duration, job: Arc<dyn PeriodicJob>) {
        self.supervisor.register(name, interval, job);
    }

    /// Stop a periodic job. Returns false when the name is unknown.
    pub fn unschedule(&self, name: &str) -> bool {
        self.supervisor.unregister(name)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatch: self.dispatcher.stats(),
            queue_depths: self.dispatcher.queue_depths(),
            cache_hits: self.cache.hit_count(),
            cache_misses: self.cache.miss_count(),
            cache_provider: self.cache.provider_name(),
            lockout_active: self.limits.lockout_active(),
            lockout_remaining_ms: self.limits.lockout_remaining().as_millis() as u64,
            tracked_resources: self.limits.tracked_resources(),
            tasks: self.supervisor.stats_all(),
        }
    }

    /// Graceful stop: refuse new work, drain the queues, let in-progress
    /// calls and job iterations finish, stop every periodic task.
    /// Idempotent.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown();
        self.supervisor.shutdown_all().await;
        info!("Pacer core shut down");
    }
}

impl std::fmt::Debug for PacerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacerCore")
            .field("cache_provider", &self.cache.provider_name())
            .field("shutting_down", &self.dispatcher.is_shutting_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{call_fn, CallOutcome};
    use serde_json::json;

    async fn core() -> PacerCore {
        let mut config = PacerConfig::default();
        config.cache.enabled = false;
        config.dispatch.retry.base_delay_ms = 10;
        PacerCore::from_config(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid_settings() {
        let mut config = PacerConfig::default();
        config.dispatch.retry.max_retries = 0;
        assert!(PacerCore::from_config(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_queue_and_metrics_round_trip() {
        let core = core().await;

        let value = core
            .queue("chat", call_fn(|| async { CallOutcome::ok(json!({"id": 7})) }))
            .await
            .unwrap();
        assert_eq!(value["id"], 7);

        let snapshot = core.metrics();
        assert_eq!(snapshot.dispatch.requests_completed, 1);
        assert_eq!(snapshot.cache_provider, "memory");
        assert!(!snapshot.lockout_active);

        // The snapshot must serialize cleanly for diagnostics surfaces.
        let rendered = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(rendered["dispatch"]["requests_completed"], 1);
        core.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let core = core().await;
        core.shutdown().await;
        core.shutdown().await;
        assert!(core
            .queue("chat", call_fn(|| async { CallOutcome::ok(json!(null)) }))
            .await
            .is_err());
    }
}
