//! Directory of named caches.
//!
//! The registry guarantees exactly one cache instance per name: `create`
//! is get-or-create and a repeat call returns the existing instance,
//! ignoring any new options. Aggregate operations here are what the
//! memory monitor drives during pressure cleanup.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::{AnalyticsSnapshot, BoundedCache, CacheOptions, CleanupOutcome};

/// Named directory of [`BoundedCache`]s holding loosely-typed JSON values.
#[derive(Debug)]
pub struct CacheRegistry {
    caches: Mutex<HashMap<String, Arc<BoundedCache<Value>>>>,
    defaults: CacheOptions,
}

impl CacheRegistry {
    pub fn new(defaults: CacheOptions) -> Self {
        Self {
            caches: Mutex::new(HashMap::new()),
            defaults,
        }
    }

    /// Gets or creates the cache named `name`.
    ///
    /// Idempotent: a second call returns the existing instance. Differing
    /// options on a repeat call are ignored with a warning.
    pub fn create(&self, name: &str, options: Option<CacheOptions>) -> Arc<BoundedCache<Value>> {
        let mut caches = self.caches.lock().unwrap();
        if let Some(existing) = caches.get(name) {
            if options
                .as_ref()
                .is_some_and(|requested| requested != existing.options())
            {
                tracing::warn!(
                    cache = name,
                    "cache already exists; ignoring differing options"
                );
            }
            return Arc::clone(existing);
        }

        let cache = Arc::new(BoundedCache::new(
            name,
            options.unwrap_or_else(|| self.defaults.clone()),
        ));
        caches.insert(name.to_string(), Arc::clone(&cache));
        tracing::debug!(cache = name, "created cache");
        cache
    }

    pub fn get(&self, name: &str) -> Option<Arc<BoundedCache<Value>>> {
        self.caches.lock().unwrap().get(name).map(Arc::clone)
    }

    /// Drops the named cache from the registry. Handles held elsewhere
    /// keep the cache alive until released.
    pub fn remove(&self, name: &str) -> bool {
        self.caches.lock().unwrap().remove(name).is_some()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs `cleanup(force)` on every cache, keyed by name.
    pub fn cleanup_all(&self, force: bool) -> BTreeMap<String, CleanupOutcome> {
        self.snapshot()
            .into_iter()
            .map(|(name, cache)| (name, cache.cleanup(force)))
            .collect()
    }

    pub fn global_analytics(&self) -> BTreeMap<String, AnalyticsSnapshot> {
        self.snapshot()
            .into_iter()
            .map(|(name, cache)| (name, cache.analytics()))
            .collect()
    }

    /// Drops expired entries across all caches. Returns the total removed.
    pub fn purge_expired_all(&self) -> usize {
        self.snapshot()
            .into_iter()
            .map(|(_, cache)| cache.purge_expired())
            .sum()
    }

    /// Evicts the oldest `fraction` of entries from every cache holding
    /// more than `floor` entries. Returns the total evicted.
    pub fn evict_oldest_fraction(&self, fraction: f64, floor: usize) -> usize {
        let fraction = fraction.clamp(0.0, 1.0);
        let mut evicted = 0;
        for (_, cache) in self.snapshot() {
            let len = cache.len();
            if len <= floor {
                continue;
            }
            let count = ((len as f64 * fraction).ceil() as usize).min(len);
            evicted += cache.evict_oldest(count);
        }
        evicted
    }

    /// Clears every cache. Returns the number of entries dropped.
    pub fn clear_all(&self) -> usize {
        let mut dropped = 0;
        for (_, cache) in self.snapshot() {
            dropped += cache.len();
            cache.clear();
        }
        dropped
    }

    pub fn total_entries(&self) -> usize {
        self.snapshot().into_iter().map(|(_, c)| c.len()).sum()
    }

    /// Clones the current set of caches out so per-cache work runs
    /// without holding the registry lock.
    fn snapshot(&self) -> Vec<(String, Arc<BoundedCache<Value>>)> {
        self.caches
            .lock()
            .unwrap()
            .iter()
            .map(|(name, cache)| (name.clone(), Arc::clone(cache)))
            .collect()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_create_is_idempotent() {
        let registry = CacheRegistry::default();
        let first = registry.create("sessions", None);
        let second = registry.create(
            "sessions",
            Some(CacheOptions {
                max_size: 7,
                ..CacheOptions::default()
            }),
        );

        assert!(Arc::ptr_eq(&first, &second));
        // The differing options were ignored.
        assert_eq!(second.options().max_size, CacheOptions::default().max_size);
        assert_eq!(registry.list(), vec!["sessions".to_string()]);
    }

    #[test]
    fn test_remove_and_list() {
        let registry = CacheRegistry::default();
        registry.create("alpha", None);
        registry.create("beta", None);

        assert_eq!(registry.list(), vec!["alpha".to_string(), "beta".to_string()]);
        assert!(registry.remove("alpha"));
        assert!(!registry.remove("alpha"));
        assert_eq!(registry.list(), vec!["beta".to_string()]);
    }

    #[test]
    fn test_cleanup_all_reports_per_name() {
        let registry = CacheRegistry::default();
        registry.create("a", None).insert("k", json!(1));
        registry.create("b", None);

        let outcomes = registry.cleanup_all(true);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.values().all(|o| o.performed));
        assert_eq!(outcomes["a"].size_before, 1);
        assert_eq!(registry.total_entries(), 0);
    }

    #[test]
    fn test_global_analytics_keyed_by_name() {
        let registry = CacheRegistry::default();
        let cache = registry.create("a", None);
        cache.insert("k", json!("v"));
        cache.get("k");
        cache.get("nope");
        registry.create("b", None);

        let analytics = registry.global_analytics();
        assert_eq!(analytics["a"].hits, 1);
        assert_eq!(analytics["a"].misses, 1);
        assert_eq!(analytics["b"].hits, 0);
    }

    #[test]
    fn test_evict_oldest_fraction_skips_small_caches() {
        let registry = CacheRegistry::default();
        let big = registry.create("big", None);
        for i in 0..10 {
            big.insert(format!("k{i}"), json!(i));
        }
        let small = registry.create("small", None);
        small.insert("only", json!(0));

        let evicted = registry.evict_oldest_fraction(0.5, 4);
        assert_eq!(evicted, 5);
        assert_eq!(big.len(), 5);
        assert_eq!(small.len(), 1);
    }

    #[test]
    fn test_clear_all_counts_dropped_entries() {
        let registry = CacheRegistry::default();
        registry.create("a", None).insert("k", json!(1));
        let b = registry.create("b", None);
        b.insert("x", json!(1));
        b.insert("y", json!(2));

        assert_eq!(registry.clear_all(), 3);
        assert_eq!(registry.total_entries(), 0);
    }
}
