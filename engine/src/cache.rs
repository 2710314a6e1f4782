//! Stale-while-revalidate read cache.
//!
//! Each entry's age puts it in one of three bands:
//!
//! - **Fresh** (`age < fresh_ttl`): served directly, no backend call.
//! - **Stale** (`fresh_ttl <= age < stale_ttl`): served directly, and one
//!   background refresh is scheduled for the key.
//! - **Expired** (`age >= stale_ttl`): treated like a miss; the caller waits
//!   for the loader.
//!
//! Background refreshes are single-flight per key and bounded by
//! [`CacheConfig::refresh_timeout`]. A refresh that fails or times out is
//! logged and the stale entry stays in place for the next read to retry.
//! A refresh that finishes after the entry was overwritten or invalidated is
//! discarded so it can never roll back a write-through.

use crate::clock::{age, Clock, SystemClock};
use crate::error::Result;
use crate::Timestamp;
use dashmap::{DashMap, DashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Freshness band of a cached entry, derived at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

/// Per-instance cache timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Age below which an entry is served without any backend call.
    pub fresh_ttl: Duration,
    /// Age at or beyond which an entry is no longer served.
    pub stale_ttl: Duration,
    /// Upper bound on a background refresh.
    pub refresh_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::entity()
    }
}

impl CacheConfig {
    /// Timings suited to single-entity caches.
    pub fn entity() -> Self {
        Self {
            fresh_ttl: Duration::from_secs(10 * 60),
            stale_ttl: Duration::from_secs(30 * 60),
            refresh_timeout: Duration::from_secs(30),
        }
    }

    /// Timings suited to list caches.
    pub fn list() -> Self {
        Self {
            fresh_ttl: Duration::from_secs(60),
            ..Self::entity()
        }
    }

    /// Set the fresh TTL.
    pub fn with_fresh_ttl(mut self, ttl: Duration) -> Self {
        self.fresh_ttl = ttl;
        self
    }

    /// Set the stale TTL.
    pub fn with_stale_ttl(mut self, ttl: Duration) -> Self {
        self.stale_ttl = ttl;
        self
    }

    /// Set the background refresh timeout.
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Classify an entry by age.
    pub fn classify(&self, age: Duration) -> Freshness {
        if age < self.fresh_ttl {
            Freshness::Fresh
        } else if age < self.stale_ttl {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

/// A cached value and when it was fetched.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: Timestamp,
    generation: u64,
}

/// Counters describing how reads were served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from a fresh entry.
    pub hits: u64,
    /// Reads served from a stale entry.
    pub stale_hits: u64,
    /// Reads that waited on the loader.
    pub misses: u64,
    /// Background refreshes started.
    pub refreshes: u64,
    /// Background refreshes that failed or timed out.
    pub refresh_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

#[derive(Debug)]
struct CacheInner<V> {
    name: String,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, CacheEntry<V>>,
    refreshing: DashSet<String>,
    generation: AtomicU64,
    counters: Counters,
}

impl<V: Clone> CacheInner<V> {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn store(&self, key: &str, value: V) {
        let entry = CacheEntry {
            value,
            fetched_at: self.clock.now(),
            generation: self.next_generation(),
        };
        self.entries.insert(key.to_string(), entry);
    }

    /// Replace the entry only if nothing touched it since `generation`.
    fn store_if_unchanged(&self, key: &str, generation: u64, value: V) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.generation == generation => {
                *entry = CacheEntry {
                    value,
                    fetched_at: self.clock.now(),
                    generation: self.next_generation(),
                };
                true
            }
            _ => false,
        }
    }
}

/// Freshness-aware read cache keyed by string ids.
///
/// Cloning is cheap and shares state.
#[derive(Debug)]
pub struct TieredCache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for TieredCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> TieredCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache using the system clock.
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a cache with an explicit clock.
    pub fn with_clock(name: impl Into<String>, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                name: name.into(),
                config,
                clock,
                entries: DashMap::new(),
                refreshing: DashSet::new(),
                generation: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// The cache's timing configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Read through the cache.
    ///
    /// `loader` is only invoked when the entry is missing, expired, or stale
    /// without a refresh already in flight. On a miss its error is returned
    /// to the caller; on a stale hit it runs in the background and its error
    /// is logged.
    pub async fn read<F, Fut>(&self, id: &str, loader: F) -> Result<V>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let now = self.inner.clock.now();
        let cached = self
            .inner
            .entries
            .get(id)
            .map(|e| (e.value.clone(), e.fetched_at, e.generation));

        if let Some((value, fetched_at, generation)) = cached {
            match self.inner.config.classify(age(fetched_at, now)) {
                Freshness::Fresh => {
                    self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Freshness::Stale => {
                    self.inner
                        .counters
                        .stale_hits
                        .fetch_add(1, Ordering::Relaxed);
                    self.schedule_refresh(id, generation, loader);
                    return Ok(value);
                }
                Freshness::Expired => {}
            }
        }

        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        let value = loader(id.to_string()).await?;
        self.inner.store(id, value.clone());
        Ok(value)
    }

    fn schedule_refresh<F, Fut>(&self, id: &str, generation: u64, loader: F)
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if !self.inner.refreshing.insert(id.to_string()) {
            tracing::trace!(cache = %self.inner.name, key = %id, "Refresh already in flight");
            return;
        }
        self.inner.counters.refreshes.fetch_add(1, Ordering::Relaxed);

        let inner = Arc::clone(&self.inner);
        let key = id.to_string();
        let refresh = loader(key.clone());

        tokio::spawn(async move {
            match tokio::time::timeout(inner.config.refresh_timeout, refresh).await {
                Ok(Ok(value)) => {
                    if !inner.store_if_unchanged(&key, generation, value) {
                        tracing::debug!(
                            cache = %inner.name,
                            key = %key,
                            "Discarded refresh overtaken by a newer write"
                        );
                    }
                }
                Ok(Err(err)) => {
                    inner
                        .counters
                        .refresh_failures
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        cache = %inner.name,
                        key = %key,
                        error = %err,
                        "Background refresh failed, keeping stale entry"
                    );
                }
                Err(_) => {
                    inner
                        .counters
                        .refresh_failures
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        cache = %inner.name,
                        key = %key,
                        timeout_ms = inner.config.refresh_timeout.as_millis() as u64,
                        "Background refresh timed out, keeping stale entry"
                    );
                }
            }
            inner.refreshing.remove(&key);
        });
    }

    /// Overwrite an entry with a value fetched now.
    pub fn put(&self, id: &str, value: V) {
        self.inner.store(id, value);
    }

    /// Drop an entry so the next read loads synchronously.
    pub fn invalidate(&self, id: &str) {
        self.inner.entries.remove(id);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    /// Copy of the entry for `id`, regardless of freshness.
    pub fn peek(&self, id: &str) -> Option<CacheEntry<V>> {
        self.inner.entries.get(id).map(|e| e.clone())
    }

    /// Current freshness band of `id`, if cached.
    pub fn freshness(&self, id: &str) -> Option<Freshness> {
        let now = self.inner.clock.now();
        self.inner
            .entries
            .get(id)
            .map(|e| self.inner.config.classify(age(e.fetched_at, now)))
    }

    /// Whether a background refresh for `id` is outstanding.
    pub fn is_refreshing(&self, id: &str) -> bool {
        self.inner.refreshing.contains(id)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Snapshot of read counters.
    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            stale_hits: c.stale_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            refreshes: c.refreshes.load(Ordering::Relaxed),
            refresh_failures: c.refresh_failures.load(Ordering::Relaxed),
        }
    }
}
