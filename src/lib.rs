#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Pacer Core
//!
//! Outbound request pacing, caching, and supervised background work for
//! services built on a rate-limited upstream provider.
//!
//! ## Overview
//!
//! Pacer Core sits between application code and a remote API that enforces
//! quotas. Every outbound call flows through a per-resource FIFO queue so
//! that rate-limit feedback observed by one call paces the calls behind it,
//! instead of every caller discovering the same limit independently.
//!
//! ## Architecture
//!
//! - **rate_limit**: shared quota tracking per resource plus a global
//!   lockout that pauses all resources at once
//! - **dispatch**: one queue and one consumer task per resource, with
//!   throttle-aware retries and capped exponential backoff
//! - **cache**: TTL key-value store over Redis with transparent in-memory
//!   fallback when the backend is unreachable
//! - **supervisor**: named periodic jobs with per-iteration statistics and
//!   crash containment
//! - **core**: the [`PacerCore`] facade wiring the above together
//!
//! ## Key Features
//!
//! - **Ordered dispatch**: strict FIFO within a resource, full independence
//!   across resources
//! - **Graceful degradation**: cache backend failures fall back to memory,
//!   never to an application error
//! - **Bounded retries**: transient failures retry within a configured
//!   budget; throttling retries are unlimited but always delay-gated
//! - **Cooperative shutdown**: in-flight work finishes, queued work is
//!   answered, background loops stop at iteration boundaries
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pacer_core::config::PacerConfig;
//! use pacer_core::core::PacerCore;
//! use pacer_core::dispatch::{call_fn, CallOutcome};
//! use serde_json::json;
//!
//! # async fn example() -> pacer_core::errors::PacerResult<()> {
//! let core = PacerCore::from_config(&PacerConfig::default()).await?;
//!
//! let value = core
//!     .queue("chat", call_fn(|| async {
//!         // Perform the real upstream call here and classify the result.
//!         CallOutcome::ok(json!({"reply": "hello"}))
//!     }))
//!     .await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod errors;
pub mod logging;
pub mod rate_limit;
pub mod supervisor;

pub use self::cache::{CacheError, CacheResult, CacheService, CacheStore, Ttl};
pub use self::config::PacerConfig;
pub use self::core::{MetricsSnapshot, PacerCore};
pub use self::dispatch::{
    call_fn, CallOutcome, DispatchError, PendingCall, QuotaInfo, RequestDispatcher, RetryPolicy,
    UpstreamCall,
};
pub use self::errors::{PacerError, PacerResult};
pub use self::logging::init_logging;
pub use self::rate_limit::{OutcomeSignal, RateLimitState, ResourceBucket};
pub use self::supervisor::{job_fn, PeriodicJob, TaskRecord, TaskSupervisor};
