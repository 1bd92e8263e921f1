//! Request, outcome, and policy types for the dispatcher.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;

/// Quota headroom reported by the provider alongside a successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaInfo {
    pub remaining: u32,
    pub reset_after: Duration,
    pub bucket_key: Option<String>,
}

/// Classified outcome of one executed upstream call.
///
/// The dispatcher has no provider-specific knowledge; the adapter that
/// implements [`UpstreamCall`] maps raw responses (status codes, headers)
/// into this closed set.
#[derive(Debug)]
pub enum CallOutcome {
    /// The call succeeded. `quota` carries fresh bucket data when the
    /// provider reported any.
    Success {
        value: Value,
        quota: Option<QuotaInfo>,
    },
    /// The provider throttled the call; retried without consuming a retry
    /// slot, after the signalled delay. `global` pauses every resource.
    Throttled { retry_after: Duration, global: bool },
    /// The call failed. Retryable failures back off and retry within the
    /// policy budget; non-retryable ones surface immediately.
    Failed { error: String, retryable: bool },
}

impl CallOutcome {
    pub fn ok(value: Value) -> Self {
        Self::Success { value, quota: None }
    }

    pub fn ok_with_quota(value: Value, quota: QuotaInfo) -> Self {
        Self::Success {
            value,
            quota: Some(quota),
        }
    }

    pub fn throttled(retry_after: Duration) -> Self {
        Self::Throttled {
            retry_after,
            global: false,
        }
    }

    pub fn throttled_global(retry_after: Duration) -> Self {
        Self::Throttled {
            retry_after,
            global: true,
        }
    }

    pub fn transient(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
            retryable: true,
        }
    }

    pub fn terminal(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
            retryable: false,
        }
    }
}

/// An executable outbound operation.
///
/// Implementations are opaque to the dispatcher and may be re-executed on
/// retry, so they must be safe to run more than once (the dispatcher makes
/// no exactly-once promise).
#[async_trait]
pub trait UpstreamCall: Send + Sync {
    async fn execute(&self) -> CallOutcome;
}

struct FnCall {
    f: Box<dyn Fn() -> BoxFuture<'static, CallOutcome> + Send + Sync>,
}

#[async_trait]
impl UpstreamCall for FnCall {
    async fn execute(&self) -> CallOutcome {
        (self.f)().await
    }
}

/// Wrap an async closure as an [`UpstreamCall`].
pub fn call_fn<F, Fut>(f: F) -> Arc<dyn UpstreamCall>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallOutcome> + Send + 'static,
{
    Arc::new(FnCall {
        f: Box::new(move || f().boxed()),
    })
}

/// Retry/backoff policy for transient failures.
///
/// `max_retries` bounds total attempts including the first try. Throttling
/// signals are outside this budget entirely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry number `attempt` (zero-based), capped at
    /// `max_delay`. Non-decreasing for any factor >= 1.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_factor.powi(attempt as i32);
        let delay = self.base_delay.mul_f64(multiplier);
        delay.min(self.max_delay)
    }
}

/// Terminal errors delivered to the original caller.
///
/// Throttling and transient failures are contained inside the attempt loop
/// and never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The upstream reported a non-retryable failure.
    #[error("Upstream call failed: {0}")]
    Terminal(String),

    /// The retry budget ran out on transient failures.
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The dispatcher stopped accepting or processing work.
    #[error("Dispatcher is shutting down")]
    ShuttingDown,

    /// The completion channel closed without delivering a result.
    #[error("Completion channel closed before a result was delivered")]
    ChannelClosed,
}

impl From<DispatchError> for crate::errors::PacerError {
    fn from(e: DispatchError) -> Self {
        crate::errors::PacerError::DispatchError(e.to_string())
    }
}

/// Result of a dispatched call.
pub type DispatchResult = Result<Value, DispatchError>;

/// Future resolved when a queued call completes (or terminally fails).
#[derive(Debug)]
pub struct PendingCall {
    pub(crate) rx: oneshot::Receiver<DispatchResult>,
}

impl PendingCall {
    /// A call that is already resolved, used when work is refused up front.
    pub(crate) fn resolved(result: DispatchResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for PendingCall {
    type Output = DispatchResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(DispatchError::ChannelClosed),
        })
    }
}

/// A request owned by the queue until its resource's consumer claims it.
pub(crate) struct QueuedRequest {
    pub call: Arc<dyn UpstreamCall>,
    pub retry_policy: RetryPolicy,
    pub enqueued_at: Instant,
    pub responder: oneshot::Sender<DispatchResult>,
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("retry_policy", &self.retry_policy)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}
