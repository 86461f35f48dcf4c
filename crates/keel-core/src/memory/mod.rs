//! Process memory introspection and pressure levels.
//!
//! Sampling is synchronous and cheap: `/proc/self/statm` on Linux,
//! `getrusage` on other unix targets, zeros where neither exists.

use serde::{Deserialize, Serialize};

pub mod monitor;

pub use monitor::{MemoryMonitor, MemoryMonitorConfig, MemoryStatus};

/// Point-in-time process memory usage, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    /// Data segment (the closest thing to "heap used" the OS reports).
    pub heap_used: u64,
    /// Total virtual size.
    pub heap_total: u64,
    /// Shared/mapped memory outside the data segment.
    pub external: u64,
    /// Resident set size.
    pub rss: u64,
}

/// Samples current process memory usage. Never fails; unknown fields
/// are zero.
pub fn sample() -> MemoryUsage {
    imp::sample()
}

/// Asks the allocator to return freed memory to the OS.
///
/// Stands in for the source runtime's explicit GC hook: `malloc_trim`
/// on glibc, a no-op everywhere else.
pub fn release_unused_memory() {
    imp::release_unused_memory();
}

#[cfg(target_os = "linux")]
mod imp {
    use super::MemoryUsage;

    pub fn sample() -> MemoryUsage {
        let Ok(statm) = std::fs::read_to_string("/proc/self/statm") else {
            return MemoryUsage::default();
        };
        let pages: Vec<u64> = statm
            .split_whitespace()
            .filter_map(|field| field.parse().ok())
            .collect();
        // statm fields (pages): size resident shared text lib data dt
        if pages.len() < 6 {
            return MemoryUsage::default();
        }
        // SAFETY: sysconf with a valid name has no side effects.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) }.max(0) as u64;
        MemoryUsage {
            heap_used: pages[5] * page_size,
            heap_total: pages[0] * page_size,
            external: pages[2] * page_size,
            rss: pages[1] * page_size,
        }
    }

    pub fn release_unused_memory() {
        #[cfg(target_env = "gnu")]
        // SAFETY: malloc_trim only releases free heap pages back to the OS.
        unsafe {
            libc::malloc_trim(0);
        }
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
mod imp {
    use super::MemoryUsage;

    pub fn sample() -> MemoryUsage {
        let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
        // SAFETY: getrusage writes into the buffer we own.
        let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
        if rc != 0 {
            return MemoryUsage::default();
        }
        // SAFETY: getrusage returned 0, so the struct is initialized.
        let usage = unsafe { usage.assume_init() };
        // ru_maxrss is KB on Linux but bytes on macOS; this branch is
        // non-Linux unix, where BSD-lineage systems report bytes.
        let rss = usage.ru_maxrss.max(0) as u64;
        MemoryUsage {
            heap_used: rss,
            heap_total: rss,
            external: 0,
            rss,
        }
    }

    pub fn release_unused_memory() {}
}

#[cfg(not(unix))]
mod imp {
    use super::MemoryUsage;

    pub fn sample() -> MemoryUsage {
        MemoryUsage::default()
    }

    pub fn release_unused_memory() {}
}

/// Heap-used thresholds (MB) that drive the pressure ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureThresholds {
    pub low_mb: u64,
    pub medium_mb: u64,
    pub high_mb: u64,
    pub critical_mb: u64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self {
            low_mb: 50,
            medium_mb: 100,
            high_mb: 150,
            critical_mb: 200,
        }
    }
}

/// Memory pressure ladder, lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl PressureLevel {
    pub fn from_usage(heap_used: u64, thresholds: &PressureThresholds) -> Self {
        let mb = heap_used / (1024 * 1024);
        if mb >= thresholds.critical_mb {
            PressureLevel::Critical
        } else if mb >= thresholds.high_mb {
            PressureLevel::High
        } else if mb >= thresholds.medium_mb {
            PressureLevel::Medium
        } else if mb >= thresholds.low_mb {
            PressureLevel::Low
        } else {
            PressureLevel::None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PressureLevel::None => "none",
            PressureLevel::Low => "low",
            PressureLevel::Medium => "medium",
            PressureLevel::High => "high",
            PressureLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_pressure_level_from_usage() {
        let thresholds = PressureThresholds::default();
        assert_eq!(
            PressureLevel::from_usage(10 * MB, &thresholds),
            PressureLevel::None
        );
        assert_eq!(
            PressureLevel::from_usage(50 * MB, &thresholds),
            PressureLevel::Low
        );
        assert_eq!(
            PressureLevel::from_usage(120 * MB, &thresholds),
            PressureLevel::Medium
        );
        assert_eq!(
            PressureLevel::from_usage(199 * MB, &thresholds),
            PressureLevel::High
        );
        assert_eq!(
            PressureLevel::from_usage(500 * MB, &thresholds),
            PressureLevel::Critical
        );
    }

    #[test]
    fn test_pressure_levels_are_ordered() {
        assert!(PressureLevel::None < PressureLevel::Low);
        assert!(PressureLevel::Low < PressureLevel::Medium);
        assert!(PressureLevel::Medium < PressureLevel::High);
        assert!(PressureLevel::High < PressureLevel::Critical);
    }

    #[test]
    fn test_sample_is_infallible() {
        // Values are platform dependent; the call itself must not fail.
        let usage = sample();
        assert!(usage.heap_total >= usage.heap_used || usage.heap_total == 0);
    }
}
