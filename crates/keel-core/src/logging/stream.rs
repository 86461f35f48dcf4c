//! Lazy streaming export of buffered log records.
//!
//! Streams are pull-based, finite, and non-restartable: each `next()`
//! yields one chunked record, control is ceded back to the scheduler at
//! chunk boundaries, and the cancellation token is checked before every
//! record. Cancellation ends a stream early with a partial outcome; it
//! is never surfaced as an error.

use std::collections::VecDeque;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{LogLevel, LogRecord};

/// Usage error: `stream_logs` on a logger whose streaming is disabled.
#[derive(Debug)]
pub struct StreamingDisabled {
    pub session_id: String,
}

impl std::fmt::Display for StreamingDisabled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "streaming is disabled for session {}", self.session_id)
    }
}

impl std::error::Error for StreamingDisabled {}

/// Options for [`super::SessionLogger::stream_logs`].
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Records per chunk; zero is clamped to one.
    pub chunk_size: usize,
    pub cancel: Option<CancellationToken>,
    /// Whether to drain the existing buffer (default true).
    pub include_buffer: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            cancel: None,
            include_buffer: true,
        }
    }
}

/// One streamed record plus its position metadata.
#[derive(Debug, Clone, Serialize)]
pub struct LogChunk {
    /// Index of the chunk this record belongs to.
    pub chunk_index: usize,
    /// Zero-based position of the record in the whole stream.
    pub position: usize,
    /// Total records the stream started with.
    pub total: usize,
    /// Set on the final record of the stream.
    pub is_last: bool,
    pub record: LogRecord,
}

/// How a finished stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamOutcome {
    /// Still has records to yield.
    Active,
    Completed,
    Cancelled,
}

/// Lazy, finite, non-restartable drain of one session's buffer.
#[derive(Debug)]
pub struct LogStream {
    session_id: String,
    records: VecDeque<LogRecord>,
    total: usize,
    position: usize,
    chunk_size: usize,
    cancel: Option<CancellationToken>,
    outcome: StreamOutcome,
}

impl LogStream {
    pub(super) fn new(
        session_id: String,
        records: VecDeque<LogRecord>,
        options: &StreamOptions,
    ) -> Self {
        let total = records.len();
        Self {
            session_id,
            records,
            total,
            position: 0,
            chunk_size: options.chunk_size.max(1),
            cancel: options.cancel.clone(),
            outcome: StreamOutcome::Active,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Yields the next record, or `None` once the stream has completed
    /// or was cancelled. Check [`LogStream::outcome`] to tell the two
    /// apart.
    pub async fn next(&mut self) -> Option<LogChunk> {
        if self.outcome != StreamOutcome::Active {
            return None;
        }
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            self.outcome = StreamOutcome::Cancelled;
            tracing::debug!(
                session_id = %self.session_id,
                emitted = self.position,
                total = self.total,
                "log stream cancelled"
            );
            return None;
        }

        let Some(record) = self.records.pop_front() else {
            self.outcome = StreamOutcome::Completed;
            return None;
        };

        let position = self.position;
        self.position += 1;
        let is_last = self.records.is_empty();
        if is_last {
            self.outcome = StreamOutcome::Completed;
        } else if self.position % self.chunk_size == 0 {
            // Chunk boundary: give other tasks a turn before the next
            // slice of a potentially large buffer.
            tokio::task::yield_now().await;
        }

        Some(LogChunk {
            chunk_index: position / self.chunk_size,
            position,
            total: self.total,
            is_last,
            record,
        })
    }

    pub fn outcome(&self) -> StreamOutcome {
        self.outcome
    }

    /// Records emitted so far.
    pub fn emitted(&self) -> usize {
        self.position
    }

    /// Records left to yield.
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

/// Options for [`super::LoggerRegistry::stream_aggregated_logs`].
#[derive(Debug, Clone)]
pub struct AggregatedStreamOptions {
    pub chunk_size: usize,
    pub cancel: Option<CancellationToken>,
    /// Only records at or above this level are emitted.
    pub level_filter: Option<LogLevel>,
    /// Only these sessions are merged when set.
    pub session_filter: Option<Vec<String>>,
}

impl Default for AggregatedStreamOptions {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            cancel: None,
            level_filter: None,
            session_filter: None,
        }
    }
}

/// One event from an aggregated stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregatedEvent {
    /// A record from one constituent session stream.
    Record { session_id: String, chunk: LogChunk },
    /// A constituent stream failed to open; the others continue.
    StreamError { session_id: String, message: String },
    /// Emitted exactly once, after every constituent stream is drained.
    Completed { sessions: usize, records: usize },
}

/// Merged drain over every eligible session stream.
#[derive(Debug)]
pub struct AggregatedLogStream {
    pending_errors: VecDeque<(String, String)>,
    streams: VecDeque<LogStream>,
    level_filter: Option<LogLevel>,
    cancel: Option<CancellationToken>,
    outcome: StreamOutcome,
    sessions: usize,
    records_emitted: usize,
    completed_sent: bool,
}

impl AggregatedLogStream {
    pub(super) fn new(
        streams: Vec<LogStream>,
        errors: Vec<(String, String)>,
        options: &AggregatedStreamOptions,
    ) -> Self {
        Self {
            sessions: streams.len(),
            pending_errors: errors.into(),
            streams: streams.into(),
            level_filter: options.level_filter,
            cancel: options.cancel.clone(),
            outcome: StreamOutcome::Active,
            records_emitted: 0,
            completed_sent: false,
        }
    }

    /// Yields the next aggregated event. The `Completed` marker is the
    /// final event; after it (or after cancellation) `None` is returned.
    pub async fn next(&mut self) -> Option<AggregatedEvent> {
        loop {
            if self.outcome == StreamOutcome::Cancelled || self.completed_sent {
                return None;
            }
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                self.outcome = StreamOutcome::Cancelled;
                tracing::debug!(
                    emitted = self.records_emitted,
                    "aggregated log stream cancelled"
                );
                return None;
            }

            if let Some((session_id, message)) = self.pending_errors.pop_front() {
                return Some(AggregatedEvent::StreamError {
                    session_id,
                    message,
                });
            }

            let Some(stream) = self.streams.front_mut() else {
                self.completed_sent = true;
                self.outcome = StreamOutcome::Completed;
                return Some(AggregatedEvent::Completed {
                    sessions: self.sessions,
                    records: self.records_emitted,
                });
            };

            match stream.next().await {
                Some(chunk) => {
                    if self
                        .level_filter
                        .is_some_and(|min| chunk.record.level < min)
                    {
                        continue;
                    }
                    self.records_emitted += 1;
                    let session_id = stream.session_id().to_string();
                    return Some(AggregatedEvent::Record { session_id, chunk });
                }
                None => {
                    if stream.outcome() == StreamOutcome::Cancelled {
                        self.outcome = StreamOutcome::Cancelled;
                        return None;
                    }
                    self.streams.pop_front();
                }
            }
        }
    }

    pub fn outcome(&self) -> StreamOutcome {
        self.outcome
    }

    pub fn records_emitted(&self) -> usize {
        self.records_emitted
    }
}
