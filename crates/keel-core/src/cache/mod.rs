//! Bounded in-memory caches with LRU eviction and per-entry TTL.
//!
//! A [`BoundedCache`] never grows past its configured capacity: inserting
//! into a full cache evicts the least-recently-used entry first. Entries
//! also carry an optional expiry deadline armed on write; reads refresh
//! recency (eviction order) but never extend the deadline.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::memory::{self, MemoryUsage};

pub mod registry;

pub use registry::CacheRegistry;

/// Per-cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Maximum number of entries. Zero is clamped to one.
    pub max_size: usize,
    /// Entry time-to-live in seconds. `None` disables expiry.
    pub ttl_secs: Option<u64>,
    /// Heap-used threshold (MB) above which `cleanup` clears the cache.
    pub heap_threshold_mb: u64,
    /// Minimum interval between heap samples taken by `cleanup`.
    pub pressure_check_cooldown_secs: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_secs: Some(300),
            heap_threshold_mb: 200,
            pressure_check_cooldown_secs: 5,
        }
    }
}

impl CacheOptions {
    fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    fn heap_threshold_bytes(&self) -> u64 {
        self.heap_threshold_mb.saturating_mul(1024 * 1024)
    }

    fn pressure_check_cooldown(&self) -> Duration {
        Duration::from_secs(self.pressure_check_cooldown_secs)
    }
}

/// A single cached value plus its bookkeeping.
///
/// Recency order lives in the containing `LruCache`, not here.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    last_access: Instant,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Monotonic operation counters for one cache.
///
/// Counters reset only when the cache is reconstructed.
#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    expirations: AtomicU64,
    memory_pressure_cleanups: AtomicU64,
}

impl CacheCounters {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    fn record_memory_pressure_cleanup(&self) {
        self.memory_pressure_cleanups.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time analytics for one cache.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub sets: u64,
    pub deletes: u64,
    pub expirations: u64,
    pub memory_pressure_cleanups: u64,
    /// `hits / (hits + misses)`, 0.0 before the first access.
    pub hit_rate: f64,
    pub size: usize,
    pub max_size: usize,
    pub ttl_secs: Option<u64>,
    pub memory: MemoryUsage,
}

/// Result of a pressure-driven `cleanup` call.
///
/// A skipped pass is a normal outcome, not an error; `reason` says why.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupOutcome {
    pub performed: bool,
    pub reason: String,
    pub size_before: usize,
    pub size_after: usize,
    pub heap_used_bytes: Option<u64>,
}

impl CleanupOutcome {
    fn skipped(reason: &str, size: usize, heap_used_bytes: Option<u64>) -> Self {
        Self {
            performed: false,
            reason: reason.to_string(),
            size_before: size,
            size_after: size,
            heap_used_bytes,
        }
    }
}

/// One key's diagnostic view in [`BoundedCache::export_state`].
#[derive(Debug, Clone, Serialize)]
pub struct ExportedEntry {
    pub key: String,
    /// Seconds since the entry was last read or written.
    pub idle_secs: u64,
    /// Seconds since insertion.
    pub age_secs: u64,
    pub expires_in_secs: Option<u64>,
}

/// Full diagnostic dump of one cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStateExport {
    pub name: String,
    pub options: CacheOptions,
    /// Oldest access first.
    pub entries: Vec<ExportedEntry>,
    pub analytics: AnalyticsSnapshot,
}

/// Tracks when `cleanup` last sampled the heap, so repeated calls stay
/// O(1) amortized.
#[derive(Debug, Default)]
struct PressureGate {
    last_sample: Option<Instant>,
}

impl PressureGate {
    fn try_sample(&mut self, cooldown: Duration) -> bool {
        let now = Instant::now();
        let ready = self
            .last_sample
            .is_none_or(|last| now.duration_since(last) >= cooldown);
        if ready {
            self.last_sample = Some(now);
        }
        ready
    }
}

/// Bounded LRU+TTL cache.
///
/// Cloning returns another handle to the same cache. `Clone` on `V` is the
/// deep-copy capability: `get` hands out owned clones, never references
/// into the cache.
#[derive(Debug)]
pub struct BoundedCache<V> {
    name: String,
    options: CacheOptions,
    inner: Arc<Mutex<LruCache<String, CacheEntry<V>>>>,
    counters: Arc<CacheCounters>,
    pressure: Arc<Mutex<PressureGate>>,
}

impl<V> Clone for BoundedCache<V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            options: self.options.clone(),
            inner: Arc::clone(&self.inner),
            counters: Arc::clone(&self.counters),
            pressure: Arc::clone(&self.pressure),
        }
    }
}

impl<V: Clone> BoundedCache<V> {
    pub fn new(name: impl Into<String>, options: CacheOptions) -> Self {
        let capacity = NonZeroUsize::new(options.max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            options,
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
            counters: Arc::new(CacheCounters::default()),
            pressure: Arc::new(Mutex::new(PressureGate::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Inserts a value, evicting the least-recently-used entry first when
    /// the cache is full. Arms a fresh expiry deadline for the key,
    /// replacing any existing one.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            inserted_at: now,
            last_access: now,
            expires_at: self.options.ttl().map(|ttl| now + ttl),
        };

        let mut inner = self.inner.lock().unwrap();
        if let Some((evicted_key, _)) = inner.push(key.clone(), entry)
            && evicted_key != key
        {
            self.counters.record_evictions(1);
            tracing::trace!(cache = %self.name, key = %evicted_key, "evicted LRU entry");
        }
        self.counters.record_set();
    }

    /// Returns a clone of the value, promoting the key to most recently
    /// used. An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.get_mut(key) {
            if entry.is_expired(now) {
                inner.pop(key);
                self.counters.record_expirations(1);
                self.counters.record_miss();
                return None;
            }
            entry.last_access = now;
            self.counters.record_hit();
            return Some(entry.value.clone());
        }
        self.counters.record_miss();
        None
    }

    /// Like `get`, but without promoting the key or touching counters.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let inner = self.inner.lock().unwrap();
        inner.peek(key).is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn remove(&self, key: &str) -> bool {
        let removed = self.inner.lock().unwrap().pop(key).is_some();
        if removed {
            self.counters.record_delete();
        }
        removed
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Keys ordered least-recently-used first, expired entries excluded.
    pub fn keys(&self) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap();
        Self::purge_expired_locked(&mut inner, &self.counters);
        let mut keys: Vec<String> = inner.iter().map(|(key, _)| key.clone()).collect();
        keys.reverse();
        keys
    }

    /// Values in the same order as [`BoundedCache::keys`].
    pub fn values(&self) -> Vec<V> {
        let mut inner = self.inner.lock().unwrap();
        Self::purge_expired_locked(&mut inner, &self.counters);
        let mut values: Vec<V> = inner.iter().map(|(_, entry)| entry.value.clone()).collect();
        values.reverse();
        values
    }

    /// Key/value pairs in the same order as [`BoundedCache::keys`].
    pub fn entries(&self) -> Vec<(String, V)> {
        let mut inner = self.inner.lock().unwrap();
        Self::purge_expired_locked(&mut inner, &self.counters);
        let mut entries: Vec<(String, V)> = inner
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        entries.reverse();
        entries
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        Self::purge_expired_locked(&mut inner, &self.counters)
    }

    fn purge_expired_locked(
        inner: &mut LruCache<String, CacheEntry<V>>,
        counters: &CacheCounters,
    ) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = inner
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.pop(key);
        }
        if !expired.is_empty() {
            counters.record_expirations(expired.len() as u64);
        }
        expired.len()
    }

    /// Evicts up to `count` entries from the LRU end. Returns how many
    /// were actually evicted.
    pub fn evict_oldest(&self, count: usize) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let mut evicted = 0;
        while evicted < count && inner.pop_lru().is_some() {
            evicted += 1;
        }
        if evicted > 0 {
            self.counters.record_evictions(evicted as u64);
        }
        evicted
    }

    /// Pressure-driven cleanup: samples heap usage (at most once per
    /// cooldown interval) and clears the whole cache when `force` is set
    /// or usage exceeds the configured hard threshold.
    pub fn cleanup(&self, force: bool) -> CleanupOutcome {
        let size_before = self.len();

        if !force {
            let mut gate = self.pressure.lock().unwrap();
            if !gate.try_sample(self.options.pressure_check_cooldown()) {
                return CleanupOutcome::skipped("pressure check on cooldown", size_before, None);
            }
        }

        let usage = memory::sample();
        if !force && usage.heap_used < self.options.heap_threshold_bytes() {
            return CleanupOutcome::skipped(
                "heap usage below threshold",
                size_before,
                Some(usage.heap_used),
            );
        }

        self.clear();
        self.counters.record_memory_pressure_cleanup();
        tracing::info!(
            cache = %self.name,
            size_before,
            heap_used = usage.heap_used,
            forced = force,
            "memory pressure cleanup cleared cache"
        );
        CleanupOutcome {
            performed: true,
            reason: if force {
                "forced".to_string()
            } else {
                "heap usage above threshold".to_string()
            },
            size_before,
            size_after: 0,
            heap_used_bytes: Some(usage.heap_used),
        }
    }

    pub fn analytics(&self) -> AnalyticsSnapshot {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let accesses = hits + misses;
        AnalyticsSnapshot {
            hits,
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            memory_pressure_cleanups: self
                .counters
                .memory_pressure_cleanups
                .load(Ordering::Relaxed),
            hit_rate: if accesses == 0 {
                0.0
            } else {
                hits as f64 / accesses as f64
            },
            size: self.len(),
            max_size: self.options.max_size.max(1),
            ttl_secs: self.options.ttl_secs,
            memory: memory::sample(),
        }
    }

    /// Full diagnostic dump: config, per-key access ages (oldest first),
    /// and the analytics snapshot.
    pub fn export_state(&self) -> CacheStateExport {
        let now = Instant::now();
        let mut entries: Vec<ExportedEntry> = {
            let inner = self.inner.lock().unwrap();
            inner
                .iter()
                .map(|(key, entry)| ExportedEntry {
                    key: key.clone(),
                    idle_secs: now.duration_since(entry.last_access).as_secs(),
                    age_secs: now.duration_since(entry.inserted_at).as_secs(),
                    expires_in_secs: entry
                        .expires_at
                        .map(|deadline| deadline.saturating_duration_since(now).as_secs()),
                })
                .collect()
        };
        entries.reverse();
        CacheStateExport {
            name: self.name.clone(),
            options: self.options.clone(),
            entries,
            analytics: self.analytics(),
        }
    }
}
