use super::{FetchError, LogSource, RawLogEvent, TimeWindow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Source for log events previously exported from CloudWatch.
///
/// Accepts three layouts:
/// 1. JSONL, one `{"timestamp": <ms>, "message": "<json>"}` object per line
/// 2. A JSON array of such objects
/// 3. A raw `FilterLogEvents` page, `{"events": [...], "nextToken": ...}`
///
/// The lookback window is applied the same way the live query applies it;
/// events without a timestamp never match.
pub struct ReplaySource {
    events: Vec<RawLogEvent>,
}

#[derive(Debug, Deserialize)]
struct ExportedEvent {
    timestamp: Option<i64>,
    message: Option<String>,
}

impl From<ExportedEvent> for RawLogEvent {
    fn from(e: ExportedEvent) -> Self {
        RawLogEvent {
            timestamp: e.timestamp,
            message: e.message,
        }
    }
}

impl ReplaySource {
    /// Load every event in `path` up front.
    pub fn open(path: &Path) -> Result<Self, ReplayError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ReplayError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let events = parse_export(&contents).map_err(|e| ReplayError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::info!(path = %path.display(), events = events.len(), "loaded replay events");
        Ok(Self { events })
    }

    pub fn from_events(events: Vec<RawLogEvent>) -> Self {
        Self { events }
    }
}

/// Parse an export in any of the supported layouts.
fn parse_export(contents: &str) -> Result<Vec<RawLogEvent>, serde_json::Error> {
    let trimmed = contents.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    // Whole-document JSON first; fall back to JSONL when that fails.
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items.into_iter().map(event_from_value).collect(),
        Ok(Value::Object(mut page)) if page.contains_key("events") => {
            let items = page.remove("events").unwrap_or(Value::Null);
            serde_json::from_value::<Vec<ExportedEvent>>(items)
                .map(|v| v.into_iter().map(RawLogEvent::from).collect())
        }
        Ok(single @ Value::Object(_)) => Ok(vec![event_from_value(single)?]),
        Ok(_) | Err(_) => trimmed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str::<ExportedEvent>(l).map(RawLogEvent::from))
            .collect(),
    }
}

fn event_from_value(v: Value) -> Result<RawLogEvent, serde_json::Error> {
    serde_json::from_value::<ExportedEvent>(v).map(RawLogEvent::from)
}

#[async_trait]
impl LogSource for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    async fn filter_events(&self, window: TimeWindow) -> Result<Vec<RawLogEvent>, FetchError> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.timestamp.is_some_and(|ts| window.contains(ts)))
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
pub enum ReplayError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::Io { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ReplayError::Parse { path, source } => {
                write!(f, "failed to parse events in {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReplayError::Io { source, .. } => Some(source),
            ReplayError::Parse { source, .. } => Some(source),
        }
    }
}
