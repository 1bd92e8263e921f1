//! # Request Dispatcher Module
//!
//! Ordered mediation of outbound calls to a rate-limited upstream provider.
//!
//! ## Architecture
//!
//! One FIFO queue and exactly one consumer task per resource, built on
//! tokio mpsc channels with oneshot completion, no polling. The consumer
//! consults [`crate::rate_limit::RateLimitState`] before executing, runs
//! the caller-supplied [`UpstreamCall`] through a bounded attempt loop,
//! and feeds the classified outcome back into the tracker.
//!
//! ## Ordering and failure semantics
//!
//! - Strict FIFO within a resource; no ordering across resources
//! - Throttling signals are retried without limit, gated only by the
//!   signalled delay (a provider that keeps throttling keeps gating)
//! - Transient failures retry with capped exponential backoff up to the
//!   policy budget, which includes the first try
//! - Only terminal outcomes reach the caller; a failing request never
//!   blocks the requests queued behind it

pub mod dispatcher;
pub mod types;

pub use dispatcher::{DispatchStats, RequestDispatcher};
pub use types::{
    call_fn, CallOutcome, DispatchError, DispatchResult, PendingCall, QuotaInfo, RetryPolicy,
    UpstreamCall,
};
