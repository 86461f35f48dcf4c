//! Per-session buffered loggers with JSONL persistence and streaming
//! export.
//!
//! Each session gets its own [`SessionLogger`]. Records are forwarded to
//! the process-wide `tracing` sink immediately, buffered in memory, and
//! persisted as JSONL on `flush`. I/O failures are counted and logged,
//! never propagated; the only operation that errors is `stream_logs` on
//! a logger whose streaming is disabled.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::paths;

pub mod registry;
pub mod stream;

pub use registry::LoggerRegistry;
pub use stream::{
    AggregatedEvent, AggregatedLogStream, AggregatedStreamOptions, LogChunk, LogStream,
    StreamOptions, StreamOutcome, StreamingDisabled,
};

/// Log severity, lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn label(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Per-logger configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerOptions {
    /// Records below this level are dropped.
    pub min_level: LogLevel,
    /// Whether records are buffered for streaming/flush.
    pub streaming: bool,
    /// Bounded buffer capacity; the oldest record is dropped (and
    /// counted) once full.
    pub buffer_capacity: usize,
    /// Active log file size cap before rotation.
    pub max_file_bytes: u64,
    /// Directory for session log files. `None` resolves to the keel
    /// home logs directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            streaming: true,
            buffer_capacity: 1000,
            max_file_bytes: 5 * 1024 * 1024,
            log_dir: None,
        }
    }
}

impl LoggerOptions {
    fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(paths::logs_dir)
    }
}

/// One log record, immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// RFC3339 UTC timestamp.
    pub ts: String,
    pub session_id: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl LogRecord {
    fn new(session_id: &str, level: LogLevel, message: String, metadata: Option<Value>) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            session_id: session_id.to_string(),
            level,
            message,
            metadata,
        }
    }
}

/// Logger lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerState {
    Uninitialized,
    Initialized,
    Closing,
    Closed,
}

#[derive(Debug, Default)]
struct LoggerCounters {
    messages_logged: AtomicU64,
    bytes_written: AtomicU64,
    flush_count: AtomicU64,
    rotation_count: AtomicU64,
    errors: AtomicU64,
    dropped_records: AtomicU64,
    by_level: [AtomicU64; 4],
}

impl LoggerCounters {
    fn record_message(&self, level: LogLevel) {
        self.messages_logged.fetch_add(1, Ordering::Relaxed);
        self.by_level[level as usize].fetch_add(1, Ordering::Relaxed);
    }
}

/// Per-level message counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelCounts {
    pub debug: u64,
    pub info: u64,
    pub warn: u64,
    pub error: u64,
}

/// Point-in-time logger statistics.
#[derive(Debug, Clone, Serialize)]
pub struct LoggerStats {
    pub session_id: String,
    pub state: LoggerState,
    pub min_level: LogLevel,
    pub messages_logged: u64,
    pub bytes_written: u64,
    pub flush_count: u64,
    pub rotation_count: u64,
    pub errors: u64,
    pub dropped_records: u64,
    pub by_level: LevelCounts,
}

/// Streaming-side statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StreamingStats {
    pub streaming_enabled: bool,
    pub buffered_records: usize,
    pub buffer_capacity: usize,
    pub dropped_records: u64,
}

/// Buffered, rotatable logger for one session.
#[derive(Debug)]
pub struct SessionLogger {
    session_id: String,
    options: LoggerOptions,
    log_path: PathBuf,
    state: Mutex<LoggerState>,
    buffer: Mutex<VecDeque<LogRecord>>,
    counters: LoggerCounters,
}

impl SessionLogger {
    pub fn new(session_id: impl Into<String>, options: LoggerOptions) -> Self {
        let session_id = session_id.into();
        let log_path = options
            .resolved_log_dir()
            .join(format!("{session_id}.jsonl"));
        Self {
            session_id,
            options,
            log_path,
            state: Mutex::new(LoggerState::Uninitialized),
            buffer: Mutex::new(VecDeque::new()),
            counters: LoggerCounters::default(),
        }
    }

    /// Generates a fresh session id.
    pub fn generate_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn options(&self) -> &LoggerOptions {
        &self.options
    }

    fn state(&self) -> LoggerState {
        *self.state.lock().unwrap()
    }

    /// Prepares the session log directory. Idempotent; a directory
    /// failure is counted, not raised (later flushes will retry).
    pub fn init(&self) {
        let mut state = self.state.lock().unwrap();
        if *state != LoggerState::Uninitialized {
            return;
        }
        if let Err(error) = fs::create_dir_all(self.options.resolved_log_dir()) {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                session_id = %self.session_id,
                error = %error,
                "failed to create session log directory"
            );
        }
        *state = LoggerState::Initialized;
        tracing::debug!(session_id = %self.session_id, "session logger initialized");
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.log_with(level, message, None);
    }

    /// Records a message: forwards it to the sink, counts it, and (when
    /// streaming) buffers it. No-op below the minimum level or once
    /// closing has begun.
    pub fn log_with(&self, level: LogLevel, message: impl Into<String>, metadata: Option<Value>) {
        if level < self.options.min_level {
            return;
        }
        if matches!(self.state(), LoggerState::Closing | LoggerState::Closed) {
            return;
        }

        let record = LogRecord::new(&self.session_id, level, message.into(), metadata);
        self.forward_to_sink(&record);
        self.counters.record_message(level);

        if self.options.streaming {
            let mut buffer = self.buffer.lock().unwrap();
            if buffer.len() >= self.options.buffer_capacity.max(1) {
                buffer.pop_front();
                self.counters.dropped_records.fetch_add(1, Ordering::Relaxed);
            }
            buffer.push_back(record);
        }
    }

    /// The structured sink must never throw back into the logger, which
    /// `tracing` guarantees by construction.
    fn forward_to_sink(&self, record: &LogRecord) {
        let session_id = self.session_id.as_str();
        match record.level {
            LogLevel::Debug => {
                tracing::debug!(target: "keel::session", session_id, "{}", record.message);
            }
            LogLevel::Info => {
                tracing::info!(target: "keel::session", session_id, "{}", record.message);
            }
            LogLevel::Warn => {
                tracing::warn!(target: "keel::session", session_id, "{}", record.message);
            }
            LogLevel::Error => {
                tracing::error!(target: "keel::session", session_id, "{}", record.message);
            }
        }
    }

    /// Persists buffered records as JSONL and clears the buffer. I/O
    /// failures are swallowed into the error counter.
    pub fn flush(&self) {
        self.counters.flush_count.fetch_add(1, Ordering::Relaxed);
        let drained: Vec<LogRecord> = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }
        if let Err(error) = self.persist(&drained) {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                session_id = %self.session_id,
                error = %format!("{error:#}"),
                "failed to persist session log records"
            );
        }
    }

    fn persist(&self, records: &[LogRecord]) -> Result<()> {
        fs::create_dir_all(self.options.resolved_log_dir())
            .context("create session log directory")?;
        self.rotate_if_needed()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .context("open session log file")?;
        let mut written: u64 = 0;
        for record in records {
            let json = serde_json::to_string(record).context("serialize log record")?;
            writeln!(file, "{json}").context("write session log record")?;
            written += json.len() as u64 + 1;
        }
        self.counters.bytes_written.fetch_add(written, Ordering::Relaxed);
        Ok(())
    }

    /// Renames the active file aside once it reaches the size cap.
    fn rotate_if_needed(&self) -> Result<()> {
        let current = fs::metadata(&self.log_path).map(|m| m.len()).unwrap_or(0);
        if current < self.options.max_file_bytes.max(1) {
            return Ok(());
        }
        let rotated = self.log_path.with_extension("jsonl.1");
        fs::rename(&self.log_path, &rotated).context("rotate session log file")?;
        self.counters.rotation_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            session_id = %self.session_id,
            rotated = %rotated.display(),
            "rotated session log file"
        );
        Ok(())
    }

    /// Flushes once and marks the logger closed. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if matches!(*state, LoggerState::Closing | LoggerState::Closed) {
                return;
            }
            *state = LoggerState::Closing;
        }
        self.flush();
        self.buffer.lock().unwrap().clear();
        *self.state.lock().unwrap() = LoggerState::Closed;
        tracing::debug!(session_id = %self.session_id, "session logger closed");
    }

    /// Starts a streaming drain of the buffer.
    ///
    /// # Errors
    /// Returns [`StreamingDisabled`] when this logger was not configured
    /// for streaming; this is the one usage error the logging layer
    /// raises.
    pub fn stream_logs(&self, options: StreamOptions) -> Result<LogStream, StreamingDisabled> {
        if !self.options.streaming {
            return Err(StreamingDisabled {
                session_id: self.session_id.clone(),
            });
        }
        let records: VecDeque<LogRecord> = if options.include_buffer {
            self.buffer.lock().unwrap().drain(..).collect()
        } else {
            VecDeque::new()
        };
        Ok(LogStream::new(self.session_id.clone(), records, &options))
    }

    pub fn stats(&self) -> LoggerStats {
        LoggerStats {
            session_id: self.session_id.clone(),
            state: self.state(),
            min_level: self.options.min_level,
            messages_logged: self.counters.messages_logged.load(Ordering::Relaxed),
            bytes_written: self.counters.bytes_written.load(Ordering::Relaxed),
            flush_count: self.counters.flush_count.load(Ordering::Relaxed),
            rotation_count: self.counters.rotation_count.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            dropped_records: self.counters.dropped_records.load(Ordering::Relaxed),
            by_level: LevelCounts {
                debug: self.counters.by_level[LogLevel::Debug as usize].load(Ordering::Relaxed),
                info: self.counters.by_level[LogLevel::Info as usize].load(Ordering::Relaxed),
                warn: self.counters.by_level[LogLevel::Warn as usize].load(Ordering::Relaxed),
                error: self.counters.by_level[LogLevel::Error as usize].load(Ordering::Relaxed),
            },
        }
    }

    pub fn streaming_stats(&self) -> StreamingStats {
        StreamingStats {
            streaming_enabled: self.options.streaming,
            buffered_records: self.buffer.lock().unwrap().len(),
            buffer_capacity: self.options.buffer_capacity,
            dropped_records: self.counters.dropped_records.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn log_path(&self) -> &PathBuf {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn logger_in(dir: &std::path::Path, session: &str, options: LoggerOptions) -> SessionLogger {
        let logger = SessionLogger::new(
            session,
            LoggerOptions {
                log_dir: Some(dir.to_path_buf()),
                ..options
            },
        );
        logger.init();
        logger
    }

    #[test]
    fn test_min_level_filters_records() {
        let dir = tempdir().unwrap();
        let logger = logger_in(
            dir.path(),
            "s1",
            LoggerOptions {
                min_level: LogLevel::Warn,
                ..LoggerOptions::default()
            },
        );

        logger.debug("dropped");
        logger.info("dropped");
        logger.warn("kept");
        logger.error("kept");

        let stats = logger.stats();
        assert_eq!(stats.messages_logged, 2);
        assert_eq!(stats.by_level.warn, 1);
        assert_eq!(stats.by_level.error, 1);
        assert_eq!(stats.by_level.info, 0);
    }

    #[test]
    fn test_flush_writes_jsonl_and_clears_buffer() {
        let dir = tempdir().unwrap();
        let logger = logger_in(dir.path(), "s1", LoggerOptions::default());

        logger.info("first");
        logger.warn("second");
        assert_eq!(logger.streaming_stats().buffered_records, 2);

        logger.flush();

        assert_eq!(logger.streaming_stats().buffered_records, 0);
        let stats = logger.stats();
        assert_eq!(stats.flush_count, 1);
        assert!(stats.bytes_written > 0);
        assert_eq!(stats.errors, 0);

        let content = fs::read_to_string(logger.log_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: LogRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.message, "first");
        assert_eq!(first.session_id, "s1");
    }

    #[test]
    fn test_buffer_drops_oldest_when_full() {
        let dir = tempdir().unwrap();
        let logger = logger_in(
            dir.path(),
            "s1",
            LoggerOptions {
                buffer_capacity: 3,
                ..LoggerOptions::default()
            },
        );

        for i in 0..5 {
            logger.info(format!("m{i}"));
        }

        let streaming = logger.streaming_stats();
        assert_eq!(streaming.buffered_records, 3);
        assert_eq!(streaming.dropped_records, 2);
    }

    #[test]
    fn test_close_is_idempotent_and_flushes_once() {
        let dir = tempdir().unwrap();
        let logger = logger_in(dir.path(), "s1", LoggerOptions::default());

        logger.info("before close");
        logger.close();
        logger.close();

        let stats = logger.stats();
        assert_eq!(stats.state, LoggerState::Closed);
        // Only the first close performed a flush.
        assert_eq!(stats.flush_count, 1);

        // Logging after close is a no-op.
        logger.info("after close");
        assert_eq!(logger.stats().messages_logged, 1);
    }

    #[test]
    fn test_rotation_renames_active_file() {
        let dir = tempdir().unwrap();
        let logger = logger_in(
            dir.path(),
            "s1",
            LoggerOptions {
                max_file_bytes: 64,
                ..LoggerOptions::default()
            },
        );

        logger.info("a message long enough to pass the tiny rotation cap");
        logger.flush();
        logger.info("second batch triggers rotation on its flush");
        logger.flush();

        assert_eq!(logger.stats().rotation_count, 1);
        assert!(logger.log_path().with_extension("jsonl.1").exists());
        assert!(logger.log_path().exists());
    }

    #[test]
    fn test_flush_failure_is_counted_not_raised() {
        let dir = tempdir().unwrap();
        // A log "directory" that is actually a file makes persistence fail.
        let bogus = dir.path().join("not-a-dir");
        fs::write(&bogus, "x").unwrap();
        let logger = SessionLogger::new(
            "s1",
            LoggerOptions {
                log_dir: Some(bogus),
                ..LoggerOptions::default()
            },
        );
        logger.init();

        logger.info("will fail to persist");
        logger.flush();

        let stats = logger.stats();
        assert!(stats.errors >= 1);
        assert_eq!(stats.bytes_written, 0);
    }

    #[test]
    fn test_stream_logs_requires_streaming() {
        let dir = tempdir().unwrap();
        let logger = logger_in(
            dir.path(),
            "s1",
            LoggerOptions {
                streaming: false,
                ..LoggerOptions::default()
            },
        );

        let error = logger.stream_logs(StreamOptions::default()).unwrap_err();
        assert!(error.to_string().contains("s1"));

        // Non-streaming loggers still count messages, but buffer nothing.
        logger.info("not buffered");
        assert_eq!(logger.stats().messages_logged, 1);
        assert_eq!(logger.streaming_stats().buffered_records, 0);
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempdir().unwrap();
        let logger = logger_in(dir.path(), "s1", LoggerOptions::default());
        logger.init();
        logger.init();
        assert_eq!(logger.stats().state, LoggerState::Initialized);
    }
}
