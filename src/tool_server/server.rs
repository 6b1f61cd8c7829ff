//! MCP server loop over line-delimited JSON-RPC.
//!
//! Reads one request per line, answers requests in order and never answers
//! notifications. Stdout carries only protocol frames; logs go to stderr.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::db::ProductStore;
use super::errors::ToolServerError;
use super::tools;
use crate::mcp_client::types::{error_codes, PROTOCOL_VERSION};

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "product-server";

/// Serve requests from `reader` until EOF, writing replies to `writer`.
pub async fn serve<R, W>(store: ProductStore, reader: R, mut writer: W) -> Result<(), ToolServerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut handled: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Some(reply) = handle_line(&store, &line) else {
            continue;
        };
        handled += 1;

        let mut frame = serde_json::to_string(&reply).map_err(|e| ToolServerError::Io {
            reason: format!("failed to encode reply: {e}"),
        })?;
        frame.push('\n');
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
    }

    tracing::info!(requests = handled, "stdin closed, shutting down");
    Ok(())
}

/// Handle one frame. `None` means nothing is written back.
pub fn handle_line(store: &ProductStore, line: &str) -> Option<Value> {
    let message: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable frame");
            return Some(error_reply(
                Value::Null,
                error_codes::PARSE_ERROR,
                format!("parse error: {e}"),
            ));
        }
    };

    let method = message.get("method").and_then(Value::as_str);
    let id = message.get("id").cloned();

    let (Some(method), Some(id)) = (method, id) else {
        match method {
            Some(method) => tracing::debug!(method, "notification"),
            // A reply to a request we never sent, or garbage.
            None => tracing::debug!("ignoring frame without a method"),
        }
        return None;
    };

    let params = message.get("params").cloned().unwrap_or(Value::Null);
    tracing::debug!(method, "request");

    Some(match dispatch(store, method, &params) {
        Ok(result) => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err((code, message)) => error_reply(id, code, message),
    })
}

fn dispatch(store: &ProductStore, method: &str, params: &Value) -> Result<Value, (i32, String)> {
    match method {
        "initialize" => Ok(serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {"listChanged": false}},
            "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
        })),
        "ping" => Ok(serde_json::json!({})),
        "tools/list" => Ok(serde_json::json!({"tools": tools::definitions()})),
        "tools/call" => {
            let name = params
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| (error_codes::INVALID_PARAMS, "missing tool name".to_string()))?;
            let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
            let today = chrono::Local::now().date_naive();

            match tools::call(store, name, &arguments, today) {
                Ok(result) => {
                    tracing::info!(tool = name, is_error = result.is_error, "tool call");
                    serde_json::to_value(result)
                        .map_err(|e| (error_codes::INTERNAL_ERROR, e.to_string()))
                }
                Err(e @ ToolServerError::UnknownTool { .. }) => {
                    Err((error_codes::INVALID_PARAMS, e.to_string()))
                }
                Err(e) => {
                    tracing::error!(tool = name, error = %e, "tool call failed");
                    serde_json::to_value(crate::mcp_client::CallToolResult::error(format!(
                        "Tool '{name}' failed: {e}"
                    )))
                    .map_err(|e| (error_codes::INTERNAL_ERROR, e.to_string()))
                }
            }
        }
        other => Err((
            error_codes::METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        )),
    }
}

fn error_reply(id: Value, code: i32, message: String) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message},
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
