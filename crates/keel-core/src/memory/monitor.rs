//! Progressive memory-pressure cleanup.
//!
//! A periodic task samples heap usage and degrades cache contents by
//! pressure level: the higher the level, the larger the slice of oldest
//! entries evicted, up to clearing every cache outright. Automatic runs
//! are throttled by a cooldown; `force_cleanup` bypasses it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheRegistry;
use crate::lifecycle::{LifecycleManager, PriorityTier};

use super::{MemoryUsage, PressureLevel, PressureThresholds, release_unused_memory, sample};

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryMonitorConfig {
    /// Seconds between heap samples.
    pub interval_secs: u64,
    /// Minimum seconds between automatic cleanup passes.
    pub cooldown_secs: u64,
    /// Caches at or below this entry count are left alone by the
    /// fractional eviction strategies.
    pub oversize_floor: usize,
    pub thresholds: PressureThresholds,
}

impl Default for MemoryMonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            cooldown_secs: 30,
            oversize_floor: 16,
            thresholds: PressureThresholds::default(),
        }
    }
}

/// Report returned by [`MemoryMonitor::memory_status`].
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStatus {
    pub usage: MemoryUsage,
    pub level: PressureLevel,
    pub recommendation: String,
    /// Seconds until the next automatic cleanup is permitted (0 when
    /// one could run now).
    pub next_cleanup_in_secs: u64,
}

#[derive(Debug)]
struct MonitorInner {
    registry: Arc<CacheRegistry>,
    config: MemoryMonitorConfig,
    last_cleanup: Mutex<Option<Instant>>,
}

impl MonitorInner {
    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.config.cooldown_secs)
    }

    fn cooldown_remaining(&self) -> Duration {
        let last = *self.last_cleanup.lock().unwrap();
        match last {
            Some(at) => self
                .cooldown()
                .saturating_sub(Instant::now().duration_since(at)),
            None => Duration::ZERO,
        }
    }

    fn mark_cleanup(&self) {
        *self.last_cleanup.lock().unwrap() = Some(Instant::now());
    }

    fn tick(&self) {
        self.registry.purge_expired_all();

        let usage = sample();
        let level = PressureLevel::from_usage(usage.heap_used, &self.config.thresholds);
        if level < PressureLevel::Low {
            return;
        }
        if !self.cooldown_remaining().is_zero() {
            tracing::debug!(%level, "memory pressure detected but cleanup is on cooldown");
            return;
        }
        self.mark_cleanup();
        self.execute_level(level, usage);
    }

    /// Runs one level's degradation strategy. Returns entries removed.
    fn execute_level(&self, level: PressureLevel, usage: MemoryUsage) -> usize {
        let floor = self.config.oversize_floor;
        let removed = match level {
            PressureLevel::None => 0,
            PressureLevel::Low => self.registry.evict_oldest_fraction(0.10, floor),
            PressureLevel::Medium => self.registry.evict_oldest_fraction(0.50, floor),
            PressureLevel::High => {
                let removed = self.registry.evict_oldest_fraction(0.75, floor);
                release_unused_memory();
                removed
            }
            PressureLevel::Critical => {
                let removed = self.registry.clear_all();
                for _ in 0..3 {
                    release_unused_memory();
                }
                tracing::warn!(
                    heap_used = usage.heap_used,
                    heap_total = usage.heap_total,
                    rss = usage.rss,
                    entries_cleared = removed,
                    "critical memory pressure: cleared all caches"
                );
                removed
            }
        };
        if removed > 0 && level < PressureLevel::Critical {
            tracing::info!(
                %level,
                entries_removed = removed,
                heap_used = usage.heap_used,
                "memory pressure cleanup"
            );
        }
        removed
    }
}

/// Periodic memory-pressure monitor over a [`CacheRegistry`].
#[derive(Debug)]
pub struct MemoryMonitor {
    inner: Arc<MonitorInner>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryMonitor {
    pub fn new(registry: Arc<CacheRegistry>, config: MemoryMonitorConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                registry,
                config,
                last_cleanup: Mutex::new(None),
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawns the periodic sampling task. Idempotent; a no-op when no
    /// tokio runtime is running.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no tokio runtime; memory monitor not started");
            return;
        };

        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        let interval = Duration::from_secs(self.inner.config.interval_secs.max(1));
        *task = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => inner.tick(),
                }
            }
        }));
        tracing::debug!(
            interval_secs = self.inner.config.interval_secs,
            "memory monitor started"
        );
    }

    /// Runs a cleanup pass at `level` immediately, bypassing the
    /// cooldown. Returns entries removed.
    pub fn force_cleanup(&self, level: PressureLevel) -> usize {
        self.inner.mark_cleanup();
        self.inner.execute_level(level, sample())
    }

    pub fn memory_status(&self) -> MemoryStatus {
        let usage = sample();
        let level = PressureLevel::from_usage(usage.heap_used, &self.inner.config.thresholds);
        MemoryStatus {
            usage,
            level,
            recommendation: recommendation(level).to_string(),
            next_cleanup_in_secs: self.inner.cooldown_remaining().as_secs(),
        }
    }

    /// Stops the sampling task. Safe to call more than once.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
            tracing::debug!("memory monitor stopped");
        }
    }

    /// Registers this monitor's shutdown handler: one critical pass,
    /// then timer teardown.
    pub fn register_with(self: &Arc<Self>, lifecycle: &LifecycleManager) {
        let monitor = Arc::clone(self);
        lifecycle.register_cleanup_handler(
            "memory-monitor",
            PriorityTier::Caches.value(),
            move || {
                let monitor = Arc::clone(&monitor);
                async move {
                    monitor.force_cleanup(PressureLevel::Critical);
                    monitor.stop();
                    Ok(())
                }
            },
        );
    }
}

fn recommendation(level: PressureLevel) -> &'static str {
    match level {
        PressureLevel::None => "memory usage is healthy",
        PressureLevel::Low => "consider reducing cache TTLs",
        PressureLevel::Medium => "cache eviction is active; review cache sizing",
        PressureLevel::High => "aggressive eviction is active; reduce workload if possible",
        PressureLevel::Critical => "caches are being cleared; restart may be required",
    }
}
