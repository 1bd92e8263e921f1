//! In-memory cache provider
//!
//! The fallback backend used when no remote cache is reachable at startup.
//! Functionally identical to the remote backend from the caller's
//! standpoint: per-entry TTL with lazy expiry at read time, glob pattern
//! invalidation, and counter increments. The only observable difference is
//! that nothing survives a process restart.
//!
//! **Important**: this cache is NOT shared across processes. Each process
//! maintains its own state.

use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::traits::CacheService;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// In-process cache service backed by a concurrent map.
///
/// Expired entries are dropped lazily when touched by a read, and swept in
/// bulk by [`MemoryCacheService::purge_expired`]. `increment` is atomic
/// within the process via the map's entry lock.
#[derive(Debug, Default)]
pub struct MemoryCacheService {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryCacheService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed. Suitable
    /// as a periodic sweeper job body.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }
}

impl CacheService for MemoryCacheService {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                debug!(key = key, "Cache HIT (memory)");
                return Ok(Some(entry.value.clone()));
            }
            None => false,
        };

        if expired {
            self.entries.remove(key);
        }
        debug!(key = key, "Cache MISS (memory)");
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        debug!(key = key, ttl_ms = ttl.as_millis() as u64, "Cache SET (memory)");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        debug!(key = key, "Cache DEL (memory)");
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Duration) -> CacheResult<i64> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    entry.value = amount.to_string();
                    entry.expires_at = now + ttl;
                    return Ok(amount);
                }
                let current: i64 = entry.value.parse().map_err(|_| {
                    CacheError::SerializationError(format!(
                        "key {key} does not hold an integer counter"
                    ))
                })?;
                let next = current + amount;
                entry.value = next.to_string();
                Ok(next)
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry {
                    value: amount.to_string(),
                    expires_at: now + ttl,
                });
                Ok(amount)
            }
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let now = Instant::now();
        let mut deleted: u64 = 0;
        // Expired entries are purged as a side effect but not counted.
        self.entries.retain(|key, entry| {
            if entry.is_expired(now) {
                return false;
            }
            if glob_match(pattern, key) {
                deleted += 1;
                return false;
            }
            true
        });
        debug!(pattern = pattern, deleted = deleted, "Cache pattern DEL (memory)");
        Ok(deleted)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

/// Glob matching over the same subset the remote backend's MATCH supports
/// here: `*` (any run of characters) and `?` (any single character).
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            // Backtrack: let the last '*' swallow one more character.
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
