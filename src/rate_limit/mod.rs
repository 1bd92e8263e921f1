//! # Rate Limit State
//!
//! Pure bookkeeping for per-resource quota buckets and the process-wide
//! global lockout. This module never performs I/O and never returns errors;
//! the dispatcher consults it before executing and feeds outcomes back in.
//!
//! ## Ownership model
//!
//! Each resource's bucket is written only by that resource's single consumer
//! task, so bucket updates need no cross-consumer coordination beyond the
//! map itself. The global lockout is the one value touched by every
//! consumer: a single atomic epoch-milliseconds deadline that writers only
//! ever move forward and readers compare against "now".

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Quota bookkeeping for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBucket {
    /// Calls remaining before the provider will throttle this resource.
    pub remaining: u32,
    /// Epoch milliseconds at which the quota resets.
    pub reset_at_ms: u64,
    /// Provider-assigned bucket identifier, when one is reported.
    pub bucket_key: Option<String>,
}

/// Execution outcome fed back into the tracker by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeSignal {
    /// The call succeeded and the provider reported fresh quota headroom.
    Ok {
        remaining: u32,
        reset_after: Duration,
        bucket_key: Option<String>,
    },
    /// The provider throttled the call. `global` pauses every resource.
    Throttled { retry_after: Duration, global: bool },
    /// The call completed without any quota information.
    Unknown,
}

/// Per-resource quota buckets plus the global lockout deadline.
#[derive(Debug, Default)]
pub struct RateLimitState {
    buckets: DashMap<String, ResourceBucket>,
    /// Epoch milliseconds until which every consumer must pause. Zero (or
    /// any past value) means no lockout. Monotonic: only moved forward.
    lockout_until_ms: AtomicU64,
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time the caller must wait before executing the next call for
    /// `resource`. Zero when clear. Accounts for both the global lockout and
    /// the resource's own bucket.
    pub fn should_wait(&self, resource: &str) -> Duration {
        let lockout = self.lockout_remaining();
        if !lockout.is_zero() {
            return lockout;
        }

        let now = now_ms();
        match self.buckets.get(resource) {
            Some(bucket) if bucket.remaining == 0 && bucket.reset_at_ms > now => {
                Duration::from_millis(bucket.reset_at_ms - now)
            }
            _ => Duration::ZERO,
        }
    }

    /// Record the outcome of an executed call for `resource`.
    pub fn record_outcome(&self, resource: &str, signal: OutcomeSignal) {
        let now = now_ms();
        match signal {
            OutcomeSignal::Ok {
                remaining,
                reset_after,
                bucket_key,
            } => {
                self.buckets.insert(
                    resource.to_string(),
                    ResourceBucket {
                        remaining,
                        reset_at_ms: now + reset_after.as_millis() as u64,
                        bucket_key,
                    },
                );
            }
            OutcomeSignal::Throttled {
                retry_after,
                global: true,
            } => {
                let deadline = now + retry_after.as_millis() as u64;
                let previous = self.lockout_until_ms.fetch_max(deadline, Ordering::AcqRel);
                if deadline > previous {
                    warn!(
                        resource = resource,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Global lockout engaged"
                    );
                }
            }
            OutcomeSignal::Throttled {
                retry_after,
                global: false,
            } => {
                let reset_at_ms = now + retry_after.as_millis() as u64;
                debug!(
                    resource = resource,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Resource bucket exhausted"
                );
                self.buckets
                    .entry(resource.to_string())
                    .and_modify(|bucket| {
                        bucket.remaining = 0;
                        bucket.reset_at_ms = reset_at_ms;
                    })
                    .or_insert(ResourceBucket {
                        remaining: 0,
                        reset_at_ms,
                        bucket_key: None,
                    });
            }
            OutcomeSignal::Unknown => {
                // A successful call with no quota data clears a bucket whose
                // reset window has already passed.
                if let Some(bucket) = self.buckets.get(resource) {
                    if bucket.reset_at_ms <= now {
                        drop(bucket);
                        self.buckets.remove(resource);
                    }
                }
            }
        }
    }

    /// Whether the global lockout is currently engaged.
    pub fn lockout_active(&self) -> bool {
        !self.lockout_remaining().is_zero()
    }

    /// Time remaining on the global lockout; zero when clear. The lockout
    /// clears itself by this comparison, no writer has to reset it.
    pub fn lockout_remaining(&self) -> Duration {
        let until = self.lockout_until_ms.load(Ordering::Acquire);
        let now = now_ms();
        if until > now {
            Duration::from_millis(until - now)
        } else {
            Duration::ZERO
        }
    }

    /// Snapshot of one resource's bucket, if the tracker has seen it.
    pub fn bucket(&self, resource: &str) -> Option<ResourceBucket> {
        self.buckets.get(resource).map(|b| b.clone())
    }

    /// Number of distinct resources tracked.
    pub fn tracked_resources(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_resource_is_clear() {
        let state = RateLimitState::new();
        assert_eq!(state.should_wait("guild.fetch"), Duration::ZERO);
        assert!(!state.lockout_active());
    }

    #[test]
    fn test_ok_signal_records_bucket() {
        let state = RateLimitState::new();
        state.record_outcome(
            "guild.fetch",
            OutcomeSignal::Ok {
                remaining: 4,
                reset_after: Duration::from_secs(2),
                bucket_key: Some("abc123".to_string()),
            },
        );

        let bucket = state.bucket("guild.fetch").unwrap();
        assert_eq!(bucket.remaining, 4);
        assert_eq!(bucket.bucket_key.as_deref(), Some("abc123"));
        // Headroom remains, so the consumer does not wait.
        assert_eq!(state.should_wait("guild.fetch"), Duration::ZERO);
    }

    #[test]
    fn test_exhausted_bucket_forces_wait_until_reset() {
        let state = RateLimitState::new();
        state.record_outcome(
            "user.update",
            OutcomeSignal::Throttled {
                retry_after: Duration::from_millis(500),
                global: false,
            },
        );

        let wait = state.should_wait("user.update");
        assert!(wait > Duration::from_millis(300));
        assert!(wait <= Duration::from_millis(500));
        // Other resources are unaffected by a per-resource throttle.
        assert_eq!(state.should_wait("guild.fetch"), Duration::ZERO);
    }

    #[test]
    fn test_zero_remaining_with_past_reset_is_clear() {
        let state = RateLimitState::new();
        state.record_outcome(
            "user.update",
            OutcomeSignal::Ok {
                remaining: 0,
                reset_after: Duration::ZERO,
                bucket_key: None,
            },
        );
        assert_eq!(state.should_wait("user.update"), Duration::ZERO);
    }

    #[test]
    fn test_global_throttle_pauses_every_resource() {
        let state = RateLimitState::new();
        state.record_outcome(
            "user.update",
            OutcomeSignal::Throttled {
                retry_after: Duration::from_millis(400),
                global: true,
            },
        );

        assert!(state.lockout_active());
        assert!(!state.should_wait("guild.fetch").is_zero());
        assert!(!state.should_wait("user.update").is_zero());
    }

    #[test]
    fn test_lockout_deadline_only_moves_forward() {
        let state = RateLimitState::new();
        state.record_outcome(
            "a",
            OutcomeSignal::Throttled {
                retry_after: Duration::from_millis(600),
                global: true,
            },
        );
        // A shorter signal arriving later must not shrink the deadline.
        state.record_outcome(
            "b",
            OutcomeSignal::Throttled {
                retry_after: Duration::from_millis(50),
                global: true,
            },
        );

        assert!(state.lockout_remaining() > Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_lockout_clears_after_deadline() {
        let state = RateLimitState::new();
        state.record_outcome(
            "a",
            OutcomeSignal::Throttled {
                retry_after: Duration::from_millis(40),
                global: true,
            },
        );
        assert!(state.lockout_active());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!state.lockout_active());
        assert_eq!(state.should_wait("a"), Duration::ZERO);
    }

    #[test]
    fn test_unknown_signal_clears_expired_bucket() {
        let state = RateLimitState::new();
        state.record_outcome(
            "user.update",
            OutcomeSignal::Throttled {
                retry_after: Duration::ZERO,
                global: false,
            },
        );
        assert!(state.bucket("user.update").is_some());

        state.record_outcome("user.update", OutcomeSignal::Unknown);
        assert!(state.bucket("user.update").is_none());
    }

    #[test]
    fn test_unknown_signal_keeps_live_bucket() {
        let state = RateLimitState::new();
        state.record_outcome(
            "user.update",
            OutcomeSignal::Ok {
                remaining: 3,
                reset_after: Duration::from_secs(60),
                bucket_key: None,
            },
        );
        state.record_outcome("user.update", OutcomeSignal::Unknown);
        assert_eq!(state.bucket("user.update").unwrap().remaining, 3);
    }
}
