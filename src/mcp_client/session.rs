//! Client session on top of a JSON-RPC transport.
//!
//! `ToolSession` is the seam the conversation loop talks to; `McpSession`
//! is the MCP implementation that drives `initialize`, `tools/list` and
//! `tools/call` over a [`StdioTransport`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::errors::McpError;
use super::transport::{extract_result, StdioTransport};
use super::types::{
    CallToolResult, InitializeResult, JsonRpcResponse, ListToolsResult, McpToolDefinition,
    ServerInfo, PROTOCOL_VERSION,
};

/// Default timeout for a single tool call or `tools/list` page.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Operations available on an established tool session.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Fetch the live tool catalog.
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError>;

    /// Invoke one tool with a JSON object of arguments.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError>;
}

// ─── McpSession ──────────────────────────────────────────────────────────────

/// An initialized MCP client session.
pub struct McpSession {
    transport: Arc<StdioTransport>,
    server_info: Option<ServerInfo>,
    call_timeout: Duration,
    closed: AtomicBool,
}

impl McpSession {
    /// Perform the MCP handshake: `initialize`, then the `initialized`
    /// notification.
    pub async fn initialize(
        transport: Arc<StdioTransport>,
        call_timeout: Duration,
    ) -> Result<Self, McpError> {
        let name = transport.server_name().to_string();
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let response = transport.request("initialize", Some(params)).await?;
        let result = extract_result(response).map_err(|e| McpError::InitFailed {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::InitFailed {
                name: name.clone(),
                reason: format!("failed to parse initialize response: {e}"),
            })?;

        if let Some(version) = init.protocol_version.as_deref() {
            if version != PROTOCOL_VERSION {
                tracing::warn!(
                    server = %name,
                    server_version = version,
                    client_version = PROTOCOL_VERSION,
                    "protocol version mismatch, continuing"
                );
            }
        }

        transport.notify("notifications/initialized", None).await?;

        Ok(Self {
            transport,
            server_info: init.server_info,
            call_timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Server info reported during the handshake.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Mark the session closed. Later calls fail with `NotConnected`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), McpError> {
        if self.is_closed() {
            return Err(McpError::NotConnected);
        }
        Ok(())
    }

    /// Send one request, giving up after the call timeout.
    async fn request_within(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        operation: &str,
    ) -> Result<JsonRpcResponse, McpError> {
        tokio::time::timeout(self.call_timeout, self.transport.request(method, params))
            .await
            .map_err(|_| McpError::Timeout {
                operation: operation.to_string(),
                timeout_ms: self.call_timeout.as_millis() as u64,
            })?
    }
}

#[async_trait]
impl ToolSession for McpSession {
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.ensure_open()?;

        let mut tools = Vec::new();
        let mut seen_cursors = HashSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let response = self.request_within("tools/list", params, "tools/list").await?;
            let page: ListToolsResult = serde_json::from_value(extract_result(response)?)
                .map_err(|e| McpError::TransportError {
                    server: self.transport.server_name().to_string(),
                    reason: format!("failed to parse tools/list response: {e}"),
                })?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    if !seen_cursors.insert(next.clone()) {
                        return Err(McpError::TransportError {
                            server: self.transport.server_name().to_string(),
                            reason: format!("tools/list returned cursor '{next}' twice"),
                        });
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        self.ensure_open()?;

        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        let response = self
            .request_within("tools/call", Some(params), &format!("tools/call {name}"))
            .await?;

        serde_json::from_value(extract_result(response)?).map_err(|e| McpError::TransportError {
            server: self.transport.server_name().to_string(),
            reason: format!("failed to parse tools/call response: {e}"),
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// A tiny scripted server: answers each request with the next canned
    /// result, echoing the request id. Notifications are recorded only.
    fn spawn_fake_server(
        server_r: DuplexStream,
        mut server_w: DuplexStream,
        results: Vec<serde_json::Value>,
    ) -> tokio::task::JoinHandle<Vec<serde_json::Value>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut results = results.into_iter();
            let mut lines = BufReader::new(server_r).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg: serde_json::Value = serde_json::from_str(&line).unwrap();
                let id = msg.get("id").cloned();
                seen.push(msg);
                let Some(id) = id else { continue };
                let Some(result) = results.next() else { break };
                let reply = if result.get("code").is_some() {
                    serde_json::json!({"jsonrpc": "2.0", "id": id, "error": result})
                } else {
                    serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result})
                };
                let mut out = reply.to_string();
                out.push('\n');
                server_w.write_all(out.as_bytes()).await.unwrap();
            }
            seen
        })
    }

    fn transport_pair() -> (Arc<StdioTransport>, DuplexStream, DuplexStream) {
        let (client_w, server_r) = duplex(8192);
        let (server_w, client_r) = duplex(8192);
        (
            Arc::new(StdioTransport::from_io("fake", client_w, client_r)),
            server_r,
            server_w,
        )
    }

    fn init_result() -> serde_json::Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "fake", "version": "0.0.1"}
        })
    }

    #[tokio::test]
    async fn test_handshake_then_paginated_list() {
        let (transport, server_r, server_w) = transport_pair();
        let server = spawn_fake_server(
            server_r,
            server_w,
            vec![
                init_result(),
                serde_json::json!({"tools": [{"name": "a", "inputSchema": {}}], "nextCursor": "p2"}),
                serde_json::json!({"tools": [{"name": "b", "inputSchema": {}}]}),
            ],
        );

        let session = McpSession::initialize(transport.clone(), DEFAULT_CALL_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(
            session.server_info().and_then(|i| i.name.as_deref()),
            Some("fake")
        );

        let tools = session.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        transport.close().await.unwrap();
        let seen = server.await.unwrap();
        let methods: Vec<_> = seen.iter().map(|m| m["method"].as_str().unwrap()).collect();
        assert_eq!(
            methods,
            vec!["initialize", "notifications/initialized", "tools/list", "tools/list"]
        );
        assert_eq!(seen[0]["params"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(seen[3]["params"]["cursor"], "p2");
    }

    #[tokio::test]
    async fn test_call_tool_sends_name_and_arguments() {
        let (transport, server_r, server_w) = transport_pair();
        let server = spawn_fake_server(
            server_r,
            server_w,
            vec![
                init_result(),
                serde_json::json!({"content": [{"type": "text", "text": "$1.50"}]}),
            ],
        );

        let session = McpSession::initialize(transport.clone(), DEFAULT_CALL_TIMEOUT)
            .await
            .unwrap();
        let result = session
            .call_tool("lookup_price", serde_json::json!({"bar_code": "123"}))
            .await
            .unwrap();
        assert_eq!(result.texts().collect::<Vec<_>>(), vec!["$1.50"]);

        transport.close().await.unwrap();
        let seen = server.await.unwrap();
        let call = seen.last().unwrap();
        assert_eq!(call["method"], "tools/call");
        assert_eq!(call["params"]["name"], "lookup_price");
        assert_eq!(call["params"]["arguments"]["bar_code"], "123");
    }

    #[tokio::test]
    async fn test_call_tool_server_error_is_surfaced() {
        let (transport, server_r, server_w) = transport_pair();
        let _server = spawn_fake_server(
            server_r,
            server_w,
            vec![
                init_result(),
                serde_json::json!({"code": -32602, "message": "unknown tool: nope"}),
            ],
        );

        let session = McpSession::initialize(transport, DEFAULT_CALL_TIMEOUT)
            .await
            .unwrap();
        let err = session
            .call_tool("nope", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ServerError { code: -32602, .. }));
    }

    #[tokio::test]
    async fn test_initialize_error_maps_to_init_failed() {
        let (transport, server_r, server_w) = transport_pair();
        let _server = spawn_fake_server(
            server_r,
            server_w,
            vec![serde_json::json!({"code": -32603, "message": "boom"})],
        );

        let err = McpSession::initialize(transport, DEFAULT_CALL_TIMEOUT)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::InitFailed { .. }));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_calls() {
        let (transport, server_r, server_w) = transport_pair();
        let _server = spawn_fake_server(server_r, server_w, vec![init_result()]);

        let session = McpSession::initialize(transport, DEFAULT_CALL_TIMEOUT)
            .await
            .unwrap();
        session.close();
        assert!(matches!(
            session.list_tools().await.unwrap_err(),
            McpError::NotConnected
        ));
        assert!(matches!(
            session.call_tool("x", serde_json::json!({})).await.unwrap_err(),
            McpError::NotConnected
        ));
    }

    /// Answers `initialize`, then reads everything else without replying.
    fn spawn_silent_server(
        server_r: DuplexStream,
        mut server_w: DuplexStream,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_r).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg: serde_json::Value = serde_json::from_str(&line).unwrap();
                if msg["method"] != "initialize" {
                    continue;
                }
                let reply = serde_json::json!({"jsonrpc": "2.0", "id": msg["id"], "result": init_result()});
                let mut out = reply.to_string();
                out.push('\n');
                server_w.write_all(out.as_bytes()).await.unwrap();
            }
        })
    }

    #[tokio::test]
    async fn test_unanswered_list_times_out() {
        let (transport, server_r, server_w) = transport_pair();
        let _server = spawn_silent_server(server_r, server_w);

        let session = McpSession::initialize(transport, Duration::from_millis(100))
            .await
            .unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), session.list_tools())
            .await
            .expect("list_tools must give up on its own")
            .unwrap_err();
        assert!(matches!(
            err,
            McpError::Timeout { ref operation, timeout_ms: 100 } if operation == "tools/list"
        ));
    }

    #[tokio::test]
    async fn test_unanswered_call_times_out() {
        let (transport, server_r, server_w) = transport_pair();
        let _server = spawn_silent_server(server_r, server_w);

        let session = McpSession::initialize(transport, Duration::from_millis(100))
            .await
            .unwrap();
        let err = session
            .call_tool("lookup_price", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_repeated_cursor_stops_listing() {
        let (transport, server_r, server_w) = transport_pair();
        let server = spawn_fake_server(
            server_r,
            server_w,
            vec![
                init_result(),
                serde_json::json!({"tools": [{"name": "a", "inputSchema": {}}], "nextCursor": "same"}),
                serde_json::json!({"tools": [{"name": "b", "inputSchema": {}}], "nextCursor": "same"}),
                serde_json::json!({"tools": [{"name": "c", "inputSchema": {}}], "nextCursor": "same"}),
            ],
        );

        let session = McpSession::initialize(transport.clone(), DEFAULT_CALL_TIMEOUT)
            .await
            .unwrap();
        let err = session.list_tools().await.unwrap_err();
        assert!(matches!(err, McpError::TransportError { .. }));
        assert!(err.to_string().contains("'same' twice"));

        transport.close().await.unwrap();
        let seen = server.await.unwrap();
        let pages = seen.iter().filter(|m| m["method"] == "tools/list").count();
        assert_eq!(pages, 2);
    }
}
