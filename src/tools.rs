//! The four usage tools and the server object that owns them.
//!
//! Each call runs fetch → extract → aggregate to completion and shares no
//! state with other calls. Only parameter validation can fail; every other
//! fault degrades to an empty result.
use crate::aggregate::{aggregate, GroupBy, SummaryTable};
use crate::config::UsageConfig;
use crate::extract::{extract, UsageRecord};
use crate::fetch::fetch;
use crate::source::LogSource;
use serde::Serialize;
use serde_json::{json, Map, Value};

/// The operations exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    RawUsage,
    ModelUsageStats,
    UserUsageStats,
    DailyUsageStats,
}

impl Tool {
    pub const ALL: [Tool; 4] = [
        Tool::RawUsage,
        Tool::ModelUsageStats,
        Tool::UserUsageStats,
        Tool::DailyUsageStats,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tool::RawUsage => "get_raw_usage",
            Tool::ModelUsageStats => "get_model_usage_stats",
            Tool::UserUsageStats => "get_user_usage_stats",
            Tool::DailyUsageStats => "get_daily_usage_stats",
        }
    }

    pub fn from_name(name: &str) -> Option<Tool> {
        Tool::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            Tool::RawUsage => {
                "Bedrock invocation records (timestamp, region, modelId, userId, \
                 inputTokens, completionTokens, totalTokens) from the last N days."
            }
            Tool::ModelUsageStats => "Token usage statistics grouped by model.",
            Tool::UserUsageStats => {
                "Token usage statistics grouped by caller ARN, with the models each caller used."
            }
            Tool::DailyUsageStats => {
                "Token usage statistics grouped by calendar day (UTC), with the models used each day."
            }
        }
    }
}

/// A tool's result, serialized as-is to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Records(Vec<UsageRecord>),
    Summary(SummaryTable),
}

impl ToolOutput {
    pub fn is_empty(&self) -> bool {
        match self {
            ToolOutput::Records(r) => r.is_empty(),
            ToolOutput::Summary(t) => t.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    UnknownTool(String),
    InvalidParams(String),
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolError::UnknownTool(name) => write!(f, "unknown tool: {name}"),
            ToolError::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
        }
    }
}

impl std::error::Error for ToolError {}

/// Owns the log source and configuration; built once at startup and shared
/// by every transport.
pub struct ToolServer {
    source: Box<dyn LogSource>,
    config: UsageConfig,
}

impl ToolServer {
    pub fn new(source: Box<dyn LogSource>, config: UsageConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &UsageConfig {
        &self.config
    }

    /// Tool catalogue in MCP `tools/list` form.
    pub fn catalogue(&self) -> Vec<Value> {
        Tool::ALL
            .into_iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "inputSchema": self.input_schema(),
                })
            })
            .collect()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "days": {
                    "type": "integer",
                    "minimum": 0,
                    "default": self.config.tools.default_days,
                    "description": "Number of days to look back for logs",
                }
            },
        })
    }

    /// Call a tool by name with JSON arguments.
    pub async fn call_by_name(&self, name: &str, args: Option<&Value>) -> Result<ToolOutput, ToolError> {
        let tool = Tool::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let days = parse_days(args, self.config.tools.default_days)?;
        Ok(self.call(tool, days).await)
    }

    /// Run `tool` over the last `days` days.
    pub async fn call(&self, tool: Tool, days: u32) -> ToolOutput {
        tracing::debug!(tool = tool.name(), days, "tool call");
        match tool {
            Tool::RawUsage => ToolOutput::Records(self.raw_usage(days).await),
            Tool::ModelUsageStats => ToolOutput::Summary(self.model_usage_stats(days).await),
            Tool::UserUsageStats => ToolOutput::Summary(self.user_usage_stats(days).await),
            Tool::DailyUsageStats => ToolOutput::Summary(self.daily_usage_stats(days).await),
        }
    }

    pub async fn raw_usage(&self, days: u32) -> Vec<UsageRecord> {
        self.records(days).await
    }

    pub async fn model_usage_stats(&self, days: u32) -> SummaryTable {
        aggregate(&self.records(days).await, GroupBy::ModelId)
    }

    pub async fn user_usage_stats(&self, days: u32) -> SummaryTable {
        aggregate(&self.records(days).await, GroupBy::UserId)
    }

    pub async fn daily_usage_stats(&self, days: u32) -> SummaryTable {
        aggregate(&self.records(days).await, GroupBy::Date)
    }

    async fn records(&self, days: u32) -> Vec<UsageRecord> {
        let events = fetch(self.source.as_ref(), days, &self.config.retry).await;
        extract(&events)
    }
}

/// Validate the `days` argument. Absent or `null` means `default`.
pub fn parse_days(args: Option<&Value>, default: u32) -> Result<u32, ToolError> {
    let empty = Map::new();
    let obj = match args {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(m)) => m,
        Some(other) => {
            return Err(ToolError::InvalidParams(format!(
                "arguments must be an object, got {other}"
            )))
        }
    };

    match obj.get("days") {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => {
            if let Some(d) = n.as_u64() {
                return u32::try_from(d)
                    .map_err(|_| ToolError::InvalidParams(format!("days is too large: {d}")));
            }
            match n.as_f64() {
                // Integral floats such as `7.0` are what some clients send.
                Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= f64::from(u32::MAX) => {
                    Ok(f as u32)
                }
                Some(f) if f < 0.0 => Err(ToolError::InvalidParams(format!(
                    "days must be non-negative, got {n}"
                ))),
                _ => Err(ToolError::InvalidParams(format!(
                    "days must be an integer, got {n}"
                ))),
            }
        }
        Some(other) => Err(ToolError::InvalidParams(format!(
            "days must be an integer, got {other}"
        ))),
    }
}
