//! Model Context Protocol server over stdio.
//!
//! Newline-delimited JSON-RPC 2.0. Every `tools/call` runs on its own task so
//! a `notifications/cancelled` can abort the in-flight fetch; an aborted call
//! produces no response at all. Responses go out through a single channel so
//! lines never interleave.
use crate::tools::{parse_days, Tool, ToolError, ToolOutput, ToolServer};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

pub const PROTOCOL_VERSION: &str = "2025-06-18";
pub const SERVER_NAME: &str = "bedrock_usage";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

/// An incoming JSON-RPC message. `id` is absent for notifications.
#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// A finished response, tagged with the request key it answers.
type Outgoing = (String, Value);

/// Serve MCP on the process's stdin/stdout until stdin closes.
pub async fn run_stdio(server: Arc<ToolServer>) -> std::io::Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    run(server, stdin, &mut stdout).await
}

/// Serve MCP over an arbitrary line-oriented reader/writer pair.
///
/// Returns once the reader hits EOF and every in-flight call has either
/// answered or been cancelled.
pub async fn run<R, W>(server: Arc<ToolServer>, reader: R, writer: &mut W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
    let mut in_flight: HashMap<String, AbortHandle> = HashMap::new();
    let mut lines = reader.lines();
    let mut input_open = true;

    tracing::info!("mcp server ready on stdio");

    loop {
        if !input_open && in_flight.is_empty() {
            break;
        }

        tokio::select! {
            line = lines.next_line(), if input_open => match line? {
                Some(line) => {
                    if let Some(resp) = handle_line(&server, &line, &tx, &mut in_flight) {
                        write_message(writer, &resp).await?;
                    }
                }
                None => {
                    tracing::debug!(pending = in_flight.len(), "stdin closed");
                    input_open = false;
                }
            },
            Some((key, resp)) = rx.recv() => {
                in_flight.remove(&key);
                write_message(writer, &resp).await?;
            }
            else => break,
        }
    }

    tracing::info!("mcp server stopped");
    Ok(())
}

/// Handle one input line. Returns an immediate response, if any; tool calls
/// answer later through `tx`.
fn handle_line(
    server: &Arc<ToolServer>,
    line: &str,
    tx: &mpsc::UnboundedSender<Outgoing>,
    in_flight: &mut HashMap<String, AbortHandle>,
) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let raw: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Some(error_response(Value::Null, PARSE_ERROR, &format!("parse error: {e}"))),
    };
    let id = raw.get("id").cloned();
    let msg: Message = match serde_json::from_value(raw) {
        Ok(m) => m,
        Err(e) => {
            return Some(error_response(
                id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                &format!("invalid request: {e}"),
            ))
        }
    };

    let Some(id) = msg.id else {
        handle_notification(&msg.method, msg.params.as_ref(), in_flight);
        return None;
    };

    tracing::debug!(method = %msg.method, id = %id, "request");
    match msg.method.as_str() {
        "initialize" => {
            let version = msg
                .params
                .as_ref()
                .and_then(|p| p.get("protocolVersion"))
                .and_then(|v| v.as_str())
                .unwrap_or(PROTOCOL_VERSION);
            Some(result_response(
                id,
                json!({
                    "protocolVersion": version,
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            ))
        }
        "ping" => Some(result_response(id, json!({}))),
        "tools/list" => Some(result_response(id, json!({"tools": server.catalogue()}))),
        "tools/call" => start_call(server, id, msg.params, tx, in_flight),
        other => Some(error_response(
            id,
            METHOD_NOT_FOUND,
            &format!("method not found: {other}"),
        )),
    }
}

fn handle_notification(
    method: &str,
    params: Option<&Value>,
    in_flight: &mut HashMap<String, AbortHandle>,
) {
    match method {
        "notifications/cancelled" => {
            let Some(request_id) = params.and_then(|p| p.get("requestId")) else {
                return;
            };
            if let Some(handle) = in_flight.remove(&request_id.to_string()) {
                handle.abort();
                tracing::info!(request_id = %request_id, "tool call cancelled");
            }
        }
        "notifications/initialized" => tracing::debug!("client initialized"),
        other => tracing::debug!(method = other, "ignoring notification"),
    }
}

/// Validate a `tools/call` and spawn it. Validation failures answer
/// immediately, before any fetch starts.
fn start_call(
    server: &Arc<ToolServer>,
    id: Value,
    params: Option<Value>,
    tx: &mpsc::UnboundedSender<Outgoing>,
    in_flight: &mut HashMap<String, AbortHandle>,
) -> Option<Value> {
    let params: CallParams = match params.map(serde_json::from_value).transpose() {
        Ok(Some(p)) => p,
        Ok(None) => return Some(error_response(id, INVALID_PARAMS, "missing params")),
        Err(e) => return Some(error_response(id, INVALID_PARAMS, &format!("invalid params: {e}"))),
    };

    let validated = Tool::from_name(&params.name)
        .ok_or_else(|| ToolError::UnknownTool(params.name.clone()))
        .and_then(|tool| {
            parse_days(params.arguments.as_ref(), server.config().tools.default_days)
                .map(|days| (tool, days))
        });
    let (tool, days) = match validated {
        Ok(v) => v,
        Err(e) => return Some(error_response(id, INVALID_PARAMS, &e.to_string())),
    };

    let key = id.to_string();
    let server = Arc::clone(server);
    let call = tokio::spawn(async move { server.call(tool, days).await });
    in_flight.insert(key.clone(), call.abort_handle());

    // Every call that is not cancelled answers exactly once, even if the
    // call task panics, so the loop can always drain `in_flight`.
    let tx = tx.clone();
    tokio::spawn(async move {
        let resp = match call.await {
            Ok(output) => match call_result(&output) {
                Ok(result) => result_response(id, result),
                Err(e) => error_response(id, INTERNAL_ERROR, &format!("failed to encode result: {e}")),
            },
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                tracing::error!(id = %id, error = %e, "tool call failed");
                error_response(id, INTERNAL_ERROR, "tool call failed")
            }
        };
        // Receiver only goes away when the server loop has already failed.
        let _ = tx.send((key, resp));
    });
    None
}

/// MCP `CallToolResult` for a tool output.
fn call_result(output: &ToolOutput) -> Result<Value, serde_json::Error> {
    let text = serde_json::to_string_pretty(output)?;
    let structured = match output {
        ToolOutput::Records(records) => json!({"records": records}),
        ToolOutput::Summary(table) => serde_json::to_value(table)?,
    };
    Ok(json!({
        "content": [{"type": "text", "text": text}],
        "structuredContent": structured,
        "isError": false,
    }))
}

fn result_response(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Value) -> std::io::Result<()> {
    let mut line = msg.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
