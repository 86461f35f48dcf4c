//! Process-wide runtime context.
//!
//! One `Runtime` per process, constructed at the entry point and threaded
//! through explicitly. It owns the cache and logger registries, the
//! memory monitor, and the lifecycle manager, and wires the standard
//! cleanup handlers so a shutdown pass tears everything down in tier
//! order.

use std::sync::Arc;

use crate::cache::CacheRegistry;
use crate::config::KeelConfig;
use crate::lifecycle::{LifecycleManager, PriorityTier, ShutdownReason, ShutdownReport};
use crate::logging::LoggerRegistry;
use crate::memory::MemoryMonitor;

#[derive(Debug)]
pub struct Runtime {
    config: KeelConfig,
    caches: Arc<CacheRegistry>,
    loggers: Arc<LoggerRegistry>,
    monitor: Arc<MemoryMonitor>,
    lifecycle: Arc<LifecycleManager>,
}

impl Runtime {
    /// Builds a runtime whose lifecycle manager installs process hooks
    /// at first handler registration.
    pub fn new(config: KeelConfig) -> Self {
        Self::with_lifecycle(config, Arc::new(LifecycleManager::new()))
    }

    /// Builds a runtime around an existing lifecycle manager (tests,
    /// embedding hosts).
    pub fn with_lifecycle(config: KeelConfig, lifecycle: Arc<LifecycleManager>) -> Self {
        let caches = Arc::new(CacheRegistry::new(config.cache.clone()));
        let loggers = Arc::new(LoggerRegistry::new(config.logging.clone()));
        let monitor = Arc::new(MemoryMonitor::new(
            Arc::clone(&caches),
            config.memory.clone(),
        ));

        monitor.start();
        monitor.register_with(&lifecycle);

        {
            let caches = Arc::clone(&caches);
            lifecycle.register_cleanup_handler(
                "cache-registry",
                PriorityTier::Caches.value(),
                move || {
                    let caches = Arc::clone(&caches);
                    async move {
                        caches.cleanup_all(true);
                        Ok(())
                    }
                },
            );
        }
        {
            let loggers = Arc::clone(&loggers);
            lifecycle.register_cleanup_handler(
                "logger-registry",
                PriorityTier::Logging.value(),
                move || {
                    let loggers = Arc::clone(&loggers);
                    async move {
                        loggers.close_all();
                        Ok(())
                    }
                },
            );
        }

        Self {
            config,
            caches,
            loggers,
            monitor,
            lifecycle,
        }
    }

    pub fn config(&self) -> &KeelConfig {
        &self.config
    }

    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.caches
    }

    pub fn loggers(&self) -> &Arc<LoggerRegistry> {
        &self.loggers
    }

    pub fn monitor(&self) -> &Arc<MemoryMonitor> {
        &self.monitor
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Runs the full cleanup pass with the given reason.
    pub async fn shutdown(&self, reason: ShutdownReason) -> Option<ShutdownReport> {
        self.lifecycle.execute_cleanup(reason).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn test_runtime() -> Runtime {
        Runtime::with_lifecycle(
            KeelConfig::default(),
            Arc::new(LifecycleManager::without_process_hooks()),
        )
    }

    #[tokio::test]
    async fn test_runtime_wires_standard_handlers() {
        let runtime = test_runtime();
        let names: Vec<String> = runtime
            .lifecycle()
            .registered_handlers()
            .into_iter()
            .map(|h| h.name)
            .collect();

        assert_eq!(
            names,
            vec![
                "memory-monitor".to_string(),
                "cache-registry".to_string(),
                "logger-registry".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_clears_caches() {
        let runtime = test_runtime();
        let cache = runtime.caches().create("sessions", None);
        cache.insert("a", json!(1));
        cache.insert("b", json!(2));

        let report = runtime
            .shutdown(ShutdownReason::Manual("test".to_string()))
            .await
            .unwrap();

        assert!(report.failures.is_empty());
        assert_eq!(runtime.caches().total_entries(), 0);
        assert!(runtime.lifecycle().is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_closes_loggers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KeelConfig::default();
        config.logging.log_dir = Some(dir.path().to_path_buf());
        let runtime = Runtime::with_lifecycle(
            config,
            Arc::new(LifecycleManager::without_process_hooks()),
        );

        let logger = runtime.loggers().create("s1", None);
        logger.info("about to shut down");

        runtime
            .shutdown(ShutdownReason::Manual("test".to_string()))
            .await
            .unwrap();

        // close_all flushed the record to disk and emptied the registry.
        assert!(runtime.loggers().list().is_empty());
        assert_eq!(logger.stats().flush_count, 1);
        assert!(dir.path().join("s1.jsonl").exists());
    }
}
