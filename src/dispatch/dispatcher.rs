//! Per-resource FIFO dispatch with rate-limit pacing and bounded retries.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};

use crate::rate_limit::{OutcomeSignal, RateLimitState};

use super::types::{
    CallOutcome, DispatchError, DispatchResult, PendingCall, QueuedRequest, RetryPolicy,
    UpstreamCall,
};

/// Counters for dispatcher activity since construction.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DispatchStats {
    pub requests_queued: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
}

struct ResourceQueue {
    tx: mpsc::UnboundedSender<QueuedRequest>,
    depth: Arc<AtomicUsize>,
}

struct DispatcherInner {
    limits: Arc<RateLimitState>,
    queues: DashMap<String, ResourceQueue>,
    default_policy: RetryPolicy,
    shutting_down: AtomicBool,
    shutdown_notify: Notify,
    queued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl DispatcherInner {
    /// Sleep for `duration` unless shutdown arrives first. Returns false
    /// when shutdown interrupted the wait.
    async fn wait_or_shutdown(&self, duration: Duration) -> bool {
        if self.shutting_down.load(Ordering::Acquire) {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown_notify.notified() => false,
        }
    }
}

/// Accepts outbound calls, queues them per resource, and executes each
/// resource's queue strictly in order through a single consumer task.
///
/// Cloning is cheap and shares the underlying queues. Must be used within
/// a Tokio runtime; consumers are spawned lazily on first enqueue.
#[derive(Clone)]
pub struct RequestDispatcher {
    inner: Arc<DispatcherInner>,
}

impl RequestDispatcher {
    pub fn new(limits: Arc<RateLimitState>, default_policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                limits,
                queues: DashMap::new(),
                default_policy,
                shutting_down: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
                queued: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Queue a call behind everything already pending for `resource`.
    pub fn enqueue(&self, resource: &str, call: Arc<dyn UpstreamCall>) -> PendingCall {
        self.enqueue_with_policy(resource, call, self.inner.default_policy)
    }

    /// Queue a call with a request-specific retry policy.
    pub fn enqueue_with_policy(
        &self,
        resource: &str,
        call: Arc<dyn UpstreamCall>,
        policy: RetryPolicy,
    ) -> PendingCall {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return PendingCall::resolved(Err(DispatchError::ShuttingDown));
        }

        let (tx, rx) = oneshot::channel();
        let request = QueuedRequest {
            call,
            retry_policy: policy,
            enqueued_at: Instant::now(),
            responder: tx,
        };

        {
            let queue = self
                .inner
                .queues
                .entry(resource.to_string())
                .or_insert_with(|| Self::spawn_consumer(self.inner.clone(), resource));
            match queue.tx.send(request) {
                Ok(()) => {
                    queue.depth.fetch_add(1, Ordering::SeqCst);
                    self.inner.queued.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::SendError(refused)) => {
                    let _ = refused.responder.send(Err(DispatchError::ShuttingDown));
                }
            }
        }

        // An enqueue racing with shutdown() may have re-created a queue
        // after the map was cleared; drop it so the consumer drains and
        // exits instead of lingering.
        if self.inner.shutting_down.load(Ordering::Acquire) {
            self.inner.queues.remove(resource);
        }

        PendingCall { rx }
    }

    fn spawn_consumer(inner: Arc<DispatcherInner>, resource: &str) -> ResourceQueue {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        debug!(resource = resource, "Starting resource consumer");
        tokio::spawn(consumer_loop(
            inner,
            resource.to_string(),
            rx,
            depth.clone(),
        ));
        ResourceQueue { tx, depth }
    }

    /// Number of requests waiting (not yet claimed) per resource.
    pub fn queue_depths(&self) -> HashMap<String, usize> {
        self.inner
            .queues
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().depth.load(Ordering::SeqCst)))
            .collect()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            requests_queued: self.inner.queued.load(Ordering::Relaxed),
            requests_completed: self.inner.completed.load(Ordering::Relaxed),
            requests_failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Stop accepting work and interrupt every pacing/backoff wait.
    ///
    /// Calls already executing run to completion; queued requests are
    /// answered with [`DispatchError::ShuttingDown`] as their consumers
    /// drain. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Request dispatcher shutting down");
        self.inner.shutdown_notify.notify_waiters();
        // Dropping the senders lets each consumer drain its backlog and exit.
        self.inner.queues.clear();
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("resources", &self.inner.queues.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

async fn consumer_loop(
    inner: Arc<DispatcherInner>,
    resource: String,
    mut rx: mpsc::UnboundedReceiver<QueuedRequest>,
    depth: Arc<AtomicUsize>,
) {
    while let Some(request) = rx.recv().await {
        depth.fetch_sub(1, Ordering::SeqCst);

        if inner.shutting_down.load(Ordering::Acquire) {
            inner.failed.fetch_add(1, Ordering::Relaxed);
            let _ = request.responder.send(Err(DispatchError::ShuttingDown));
            continue;
        }

        debug!(
            resource = resource.as_str(),
            queue_wait_ms = request.enqueued_at.elapsed().as_millis() as u64,
            "Dequeued request"
        );

        let result =
            execute_with_policy(&inner, &resource, &request.call, request.retry_policy).await;
        match &result {
            Ok(_) => inner.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => inner.failed.fetch_add(1, Ordering::Relaxed),
        };
        if request.responder.send(result).is_err() {
            debug!(resource = resource.as_str(), "Caller dropped before completion");
        }
    }
    debug!(resource = resource.as_str(), "Resource consumer stopped");
}

/// Run one request to a terminal result: pace, execute, classify, repeat.
///
/// Throttled outcomes loop without touching the retry budget; transient
/// failures consume it. The call itself is never interrupted once started.
async fn execute_with_policy(
    inner: &DispatcherInner,
    resource: &str,
    call: &Arc<dyn UpstreamCall>,
    policy: RetryPolicy,
) -> DispatchResult {
    let mut transient_attempts: u32 = 0;

    loop {
        loop {
            let wait = inner.limits.should_wait(resource);
            if wait.is_zero() {
                break;
            }
            debug!(
                resource = resource,
                wait_ms = wait.as_millis() as u64,
                lockout = inner.limits.lockout_active(),
                "Pacing before dispatch"
            );
            if !inner.wait_or_shutdown(wait).await {
                return Err(DispatchError::ShuttingDown);
            }
        }

        match call.execute().await {
            CallOutcome::Success { value, quota } => {
                let signal = match quota {
                    Some(q) => OutcomeSignal::Ok {
                        remaining: q.remaining,
                        reset_after: q.reset_after,
                        bucket_key: q.bucket_key,
                    },
                    None => OutcomeSignal::Unknown,
                };
                inner.limits.record_outcome(resource, signal);
                return Ok(value);
            }
            CallOutcome::Throttled {
                retry_after,
                global,
            } => {
                warn!(
                    resource = resource,
                    retry_after_ms = retry_after.as_millis() as u64,
                    global = global,
                    "Upstream throttled request, will retry"
                );
                // Not counted against the retry budget; the pacing loop at
                // the top enforces the signalled delay.
                inner
                    .limits
                    .record_outcome(resource, OutcomeSignal::Throttled { retry_after, global });
            }
            CallOutcome::Failed { error, retryable } => {
                if !retryable {
                    debug!(resource = resource, error = error.as_str(), "Terminal upstream failure");
                    return Err(DispatchError::Terminal(error));
                }
                transient_attempts += 1;
                if transient_attempts >= policy.max_retries {
                    warn!(
                        resource = resource,
                        attempts = transient_attempts,
                        error = error.as_str(),
                        "Retry budget exhausted"
                    );
                    return Err(DispatchError::RetriesExhausted {
                        attempts: transient_attempts,
                        last_error: error,
                    });
                }
                let delay = policy.delay_for_attempt(transient_attempts - 1);
                debug!(
                    resource = resource,
                    attempt = transient_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, backing off"
                );
                if !inner.wait_or_shutdown(delay).await {
                    return Err(DispatchError::ShuttingDown);
                }
            }
        }
    }
}
