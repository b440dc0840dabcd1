//! Invocation-envelope extraction: parse each log event's JSON body and
//! project the fields usage reporting needs into a flat [`UsageRecord`].
use crate::source::RawLogEvent;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// One Bedrock invocation, flattened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub timestamp: Option<DateTime<Utc>>,
    pub region: Option<String>,
    pub model_id: Option<String>,
    /// Caller identity ARN.
    pub user_id: Option<String>,
    pub input_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    /// `input_tokens + completion_tokens`, missing values counted as 0.
    pub total_tokens: u64,
    /// Space-joined text of every user message in the request body.
    #[serde(skip)]
    pub prompt: String,
}

/// Why a single event was dropped.
#[derive(Debug)]
pub enum ExtractError {
    MissingMessage,
    Json(serde_json::Error),
    /// A field was present but had an unexpected type or value.
    Shape { field: &'static str, reason: String },
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::MissingMessage => write!(f, "event has no message body"),
            ExtractError::Json(e) => write!(f, "message is not JSON: {e}"),
            ExtractError::Shape { field, reason } => write!(f, "field {field}: {reason}"),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtractError::Json(e) => Some(e),
            _ => None,
        }
    }
}

/// Extract usage records from `events`, skipping any event that cannot be
/// parsed. Output order follows input order.
pub fn extract(events: &[RawLogEvent]) -> Vec<UsageRecord> {
    let mut records = Vec::with_capacity(events.len());
    let mut skipped = 0usize;

    for (index, event) in events.iter().enumerate() {
        match extract_record(event) {
            Ok(r) => records.push(r),
            Err(e) => {
                skipped += 1;
                tracing::debug!(index, error = %e, "skipping log event");
            }
        }
    }

    if skipped > 0 {
        tracing::info!(
            extracted = records.len(),
            skipped,
            "skipped malformed log events"
        );
    }
    records
}

/// Parse one event into a record.
pub fn extract_record(event: &RawLogEvent) -> Result<UsageRecord, ExtractError> {
    let body = event.message.as_deref().ok_or(ExtractError::MissingMessage)?;
    let envelope: Value = serde_json::from_str(body).map_err(ExtractError::Json)?;

    let input_tokens = token_count(&envelope, &["input", "inputTokenCount"], "input.inputTokenCount")?;
    let completion_tokens = token_count(
        &envelope,
        &["output", "outputTokenCount"],
        "output.outputTokenCount",
    )?;

    Ok(UsageRecord {
        timestamp: timestamp(&envelope),
        region: string_field(&envelope, &["region"], "region")?,
        model_id: string_field(&envelope, &["modelId"], "modelId")?,
        user_id: string_field(&envelope, &["identity", "arn"], "identity.arn")?,
        input_tokens,
        completion_tokens,
        total_tokens: input_tokens
            .unwrap_or(0)
            .saturating_add(completion_tokens.unwrap_or(0)),
        prompt: user_prompt(&envelope),
    })
}

/// Walk `path` through nested objects. Any missing level yields `None`.
pub fn lookup<'a>(v: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(v, |cur, key| cur.get(*key))
}

/// Like [`lookup`], but treats an explicit JSON `null` as absent.
fn present<'a>(v: &'a Value, path: &[&str]) -> Option<&'a Value> {
    lookup(v, path).filter(|x| !x.is_null())
}

fn string_field(
    v: &Value,
    path: &[&str],
    field: &'static str,
) -> Result<Option<String>, ExtractError> {
    match present(v, path) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ExtractError::Shape {
            field,
            reason: format!("expected string, got {other}"),
        }),
    }
}

fn token_count(
    v: &Value,
    path: &[&str],
    field: &'static str,
) -> Result<Option<u64>, ExtractError> {
    match present(v, path) {
        None => Ok(None),
        Some(n) => n.as_u64().map(Some).ok_or_else(|| ExtractError::Shape {
            field,
            reason: format!("expected non-negative integer, got {n}"),
        }),
    }
}

/// Invocation time. Accepts RFC 3339 and the space-separated
/// `YYYY-MM-DD HH:MM:SS[.fff]` form (read as UTC); anything else is dropped
/// so the record still counts, just without a day.
fn timestamp(v: &Value) -> Option<DateTime<Utc>> {
    let raw = present(v, &["timestamp"])?;
    let Some(text) = raw.as_str() else {
        tracing::debug!(timestamp = %raw, "ignoring non-string timestamp");
        return None;
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    match NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        Ok(naive) => Some(naive.and_utc()),
        Err(e) => {
            tracing::debug!(timestamp = text, error = %e, "ignoring unparseable timestamp");
            None
        }
    }
}

/// Concatenate every text block from user-role messages in the request body.
fn user_prompt(v: &Value) -> String {
    let Some(messages) = present(v, &["input", "inputBodyJson", "messages"]).and_then(|m| m.as_array())
    else {
        return String::new();
    };

    let mut prompt = String::new();
    for msg in messages {
        if msg.get("role").and_then(|r| r.as_str()) != Some("user") {
            continue;
        }
        let Some(content) = msg.get("content").and_then(|c| c.as_array()) else {
            continue;
        };
        for text in content
            .iter()
            .filter_map(|c| c.get("text").and_then(|t| t.as_str()))
            .filter(|t| !t.is_empty())
        {
            prompt.push_str(text);
            prompt.push(' ');
        }
    }
    prompt.trim().to_string()
}
