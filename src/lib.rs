//! Bedrock token-usage reporting from CloudWatch model-invocation logs.
//!
//! Pipeline: [`fetch`] pulls raw events for a lookback window from a
//! [`source::LogSource`], [`extract`] flattens each invocation envelope into a
//! [`extract::UsageRecord`], and [`aggregate`] groups records into summary
//! tables. [`tools::ToolServer`] exposes the four operations to the [`mcp`]
//! and [`serve`] transports.
pub mod aggregate;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod mcp;
pub mod retry;
pub mod serve;
pub mod source;
pub mod tools;
