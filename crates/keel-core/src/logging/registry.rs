//! Directory of per-session loggers.
//!
//! One logger instance per session id: `create` is get-or-create, and
//! `close` both closes the logger and drops it from the registry, so a
//! later `create` for the same session starts with fresh stats.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use super::stream::{AggregatedLogStream, AggregatedStreamOptions, StreamOptions};
use super::{LoggerOptions, LoggerStats, SessionLogger};

#[derive(Debug)]
pub struct LoggerRegistry {
    loggers: Mutex<HashMap<String, Arc<SessionLogger>>>,
    defaults: LoggerOptions,
}

impl LoggerRegistry {
    pub fn new(defaults: LoggerOptions) -> Self {
        Self {
            loggers: Mutex::new(HashMap::new()),
            defaults,
        }
    }

    /// Gets or creates the logger for `session_id`, initializing new
    /// loggers. Differing options on a repeat call are ignored with a
    /// warning.
    pub fn create(&self, session_id: &str, options: Option<LoggerOptions>) -> Arc<SessionLogger> {
        let mut loggers = self.loggers.lock().unwrap();
        if let Some(existing) = loggers.get(session_id) {
            if options
                .as_ref()
                .is_some_and(|requested| requested != existing.options())
            {
                tracing::warn!(
                    session_id,
                    "session logger already exists; ignoring differing options"
                );
            }
            return Arc::clone(existing);
        }

        let logger = Arc::new(SessionLogger::new(
            session_id,
            options.unwrap_or_else(|| self.defaults.clone()),
        ));
        logger.init();
        loggers.insert(session_id.to_string(), Arc::clone(&logger));
        logger
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionLogger>> {
        self.loggers.lock().unwrap().get(session_id).map(Arc::clone)
    }

    /// Closes the named logger and removes it from the registry.
    pub fn close(&self, session_id: &str) -> bool {
        let removed = self.loggers.lock().unwrap().remove(session_id);
        match removed {
            Some(logger) => {
                logger.close();
                true
            }
            None => false,
        }
    }

    /// Closes every logger and empties the registry.
    pub fn close_all(&self) {
        let drained: Vec<Arc<SessionLogger>> =
            self.loggers.lock().unwrap().drain().map(|(_, l)| l).collect();
        for logger in &drained {
            logger.close();
        }
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "closed all session loggers");
        }
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.loggers.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn global_stats(&self) -> BTreeMap<String, LoggerStats> {
        self.snapshot()
            .into_iter()
            .map(|(id, logger)| (id, logger.stats()))
            .collect()
    }

    /// Merges the streams of every eligible logger into one sequence.
    ///
    /// Sessions are drained in id order. A logger that cannot stream
    /// (streaming disabled) contributes a single error event instead of
    /// aborting the merge.
    pub fn stream_aggregated_logs(&self, options: AggregatedStreamOptions) -> AggregatedLogStream {
        let mut streams = Vec::new();
        let mut errors = Vec::new();
        for (session_id, logger) in self.snapshot() {
            if options
                .session_filter
                .as_ref()
                .is_some_and(|sessions| !sessions.contains(&session_id))
            {
                continue;
            }
            let stream_options = StreamOptions {
                chunk_size: options.chunk_size,
                cancel: options.cancel.clone(),
                include_buffer: true,
            };
            match logger.stream_logs(stream_options) {
                Ok(stream) => streams.push(stream),
                Err(error) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %error,
                        "skipping session in aggregated stream"
                    );
                    errors.push((session_id, error.to_string()));
                }
            }
        }
        AggregatedLogStream::new(streams, errors, &options)
    }

    /// Loggers sorted by session id, cloned out of the lock.
    fn snapshot(&self) -> Vec<(String, Arc<SessionLogger>)> {
        let mut loggers: Vec<(String, Arc<SessionLogger>)> = self
            .loggers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, logger)| (id.clone(), Arc::clone(logger)))
            .collect();
        loggers.sort_by(|a, b| a.0.cmp(&b.0));
        loggers
    }
}

impl Default for LoggerRegistry {
    fn default() -> Self {
        Self::new(LoggerOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::super::stream::AggregatedEvent;
    use super::super::{LogLevel, LoggerState};
    use super::*;

    fn registry_in(dir: &std::path::Path) -> LoggerRegistry {
        LoggerRegistry::new(LoggerOptions {
            log_dir: Some(dir.to_path_buf()),
            ..LoggerOptions::default()
        })
    }

    #[test]
    fn test_create_is_idempotent() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());

        let first = registry.create("s1", None);
        let second = registry.create(
            "s1",
            Some(LoggerOptions {
                min_level: LogLevel::Error,
                ..LoggerOptions::default()
            }),
        );

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.options().min_level, LogLevel::Info);
        assert_eq!(registry.list(), vec!["s1".to_string()]);
    }

    #[test]
    fn test_close_removes_and_closes() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());
        let logger = registry.create("s1", None);

        assert!(registry.close("s1"));
        assert!(!registry.close("s1"));
        assert_eq!(logger.stats().state, LoggerState::Closed);
        assert!(registry.get("s1").is_none());

        // Recreating the session yields a fresh logger with fresh stats.
        let recreated = registry.create("s1", None);
        assert!(!Arc::ptr_eq(&logger, &recreated));
        assert_eq!(recreated.stats().messages_logged, 0);
    }

    #[test]
    fn test_close_all_closes_every_logger() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());
        let a = registry.create("a", None);
        let b = registry.create("b", None);

        registry.close_all();

        assert!(registry.list().is_empty());
        assert_eq!(a.stats().state, LoggerState::Closed);
        assert_eq!(b.stats().state, LoggerState::Closed);
    }

    #[test]
    fn test_global_stats_keyed_by_session() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());
        registry.create("a", None).info("one");
        let b = registry.create("b", None);
        b.info("one");
        b.info("two");

        let stats = registry.global_stats();
        assert_eq!(stats["a"].messages_logged, 1);
        assert_eq!(stats["b"].messages_logged, 2);
    }

    #[tokio::test]
    async fn test_aggregated_stream_merges_sessions_in_order() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());
        registry.create("a", None).info("from a");
        registry.create("b", None).info("from b");

        let mut stream = registry.stream_aggregated_logs(AggregatedStreamOptions::default());
        let mut sessions = Vec::new();
        let mut saw_completed = false;
        while let Some(event) = stream.next().await {
            match event {
                AggregatedEvent::Record { session_id, .. } => sessions.push(session_id),
                AggregatedEvent::Completed { records, .. } => {
                    saw_completed = true;
                    assert_eq!(records, 2);
                }
                AggregatedEvent::StreamError { .. } => panic!("unexpected error event"),
            }
        }
        assert_eq!(sessions, vec!["a".to_string(), "b".to_string()]);
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn test_aggregated_stream_session_filter() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());
        registry.create("a", None).info("from a");
        registry.create("b", None).info("from b");

        let mut stream = registry.stream_aggregated_logs(AggregatedStreamOptions {
            session_filter: Some(vec!["b".to_string()]),
            ..AggregatedStreamOptions::default()
        });

        let mut sessions = Vec::new();
        while let Some(event) = stream.next().await {
            if let AggregatedEvent::Record { session_id, .. } = event {
                sessions.push(session_id);
            }
        }
        assert_eq!(sessions, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_aggregated_stream_reports_disabled_logger() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());
        registry.create("ok", None).info("fine");
        registry.create(
            "silent",
            Some(LoggerOptions {
                streaming: false,
                log_dir: Some(dir.path().to_path_buf()),
                ..LoggerOptions::default()
            }),
        );

        let mut stream = registry.stream_aggregated_logs(AggregatedStreamOptions::default());
        let mut error_sessions = Vec::new();
        let mut record_count = 0;
        while let Some(event) = stream.next().await {
            match event {
                AggregatedEvent::StreamError { session_id, .. } => error_sessions.push(session_id),
                AggregatedEvent::Record { .. } => record_count += 1,
                AggregatedEvent::Completed { .. } => {}
            }
        }
        assert_eq!(error_sessions, vec!["silent".to_string()]);
        assert_eq!(record_count, 1);
    }
}
