//! # TTL Cache Module
//!
//! Category-scoped TTL caching with a remote backend and an in-memory
//! fallback selected once at startup.
//!
//! ## Architecture
//!
//! ```text
//! CacheStore (enum backend)      <- Zero-cost dispatch, no vtable
//!   ├── Redis(RedisCacheService)   <- ConnectionManager-based async Redis
//!   └── Memory(MemoryCacheService) <- In-process map, per-entry expiry
//! ```
//!
//! ## Design Decisions
//!
//! - **Enum dispatch**: one backend decision at construction, no runtime
//!   type checks elsewhere
//! - **Graceful degradation**: remote connect failure at startup falls back
//!   to the in-memory backend (logged, never fatal)
//! - **Best-effort read-through**: backend errors inside
//!   `fetch_or_populate` are logged and treated as misses, never surfaced
//! - **SCAN for patterns**: pattern invalidation never uses blocking KEYS

pub mod errors;
pub mod providers;
pub mod store;
pub mod traits;

pub use errors::{CacheError, CacheResult};
pub use providers::MemoryCacheService;
pub use store::{CacheStore, Ttl};
pub use traits::CacheService;

#[cfg(feature = "cache-redis")]
pub use providers::RedisCacheService;
