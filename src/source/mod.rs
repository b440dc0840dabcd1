pub mod cloudwatch;
pub mod replay;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

pub use cloudwatch::CloudWatchSource;
pub use replay::ReplaySource;

/// One event as returned by the log store, before any parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogEvent {
    /// Event time in milliseconds since the epoch.
    pub timestamp: Option<i64>,
    /// JSON-encoded invocation envelope.
    pub message: Option<String>,
}

impl RawLogEvent {
    pub fn new(timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp: Some(timestamp),
            message: Some(message.into()),
        }
    }
}

/// Inclusive `[start_ms, end_ms]` range handed to the log query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    /// The window `[now - days, now]`.
    ///
    /// The start never precedes the Unix epoch; lookbacks reaching past it
    /// (or past chrono's date range) start at 0.
    pub fn lookback(now: DateTime<Utc>, days: u32) -> Self {
        let start_ms = TimeDelta::try_days(i64::from(days))
            .and_then(|d| now.checked_sub_signed(d))
            .map(|start| start.timestamp_millis().max(0))
            .unwrap_or(0);
        Self {
            start_ms,
            end_ms: now.timestamp_millis(),
        }
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.start_ms && ts_ms <= self.end_ms
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

/// Errors produced by a log source.
#[derive(Debug)]
pub enum FetchError {
    /// The log group or stream does not exist.
    SourceNotFound { log_group: String, log_stream: String },
    /// Any other failure while paging through results.
    Transient(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::SourceNotFound {
                log_group,
                log_stream,
            } => write!(
                f,
                "log group '{log_group}' or stream '{log_stream}' not found"
            ),
            FetchError::Transient(msg) => write!(f, "error retrieving logs: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// A store of Bedrock invocation log events.
///
/// Implementations query one fixed log group/stream and must follow
/// pagination to the end before returning: callers never see a partial
/// page set.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Human-readable source name for diagnostics (e.g., "cloudwatch").
    fn name(&self) -> &str;

    /// All events whose timestamp falls inside `window`, in page order.
    async fn filter_events(&self, window: TimeWindow) -> Result<Vec<RawLogEvent>, FetchError>;
}
