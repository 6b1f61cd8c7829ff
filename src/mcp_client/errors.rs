//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A request did not complete within its deadline.
    #[error("'{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: String,
        timeout_ms: u64,
    },

    /// No tool session is established.
    #[error("not connected to a tool server")]
    NotConnected,
}

impl McpError {
    /// Whether this error came from establishing the session (as opposed to
    /// using an established one).
    pub fn is_connection_error(&self) -> bool {
        matches!(self, McpError::SpawnFailed { .. } | McpError::InitFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_classification() {
        assert!(McpError::SpawnFailed {
            name: "products".into(),
            reason: "not found".into(),
        }
        .is_connection_error());
        assert!(McpError::InitFailed {
            name: "products".into(),
            reason: "bad handshake".into(),
        }
        .is_connection_error());
        assert!(!McpError::NotConnected.is_connection_error());
        assert!(!McpError::Timeout {
            operation: "tools/call".into(),
            timeout_ms: 10,
        }
        .is_connection_error());
    }

    #[test]
    fn test_server_error_display() {
        let err = McpError::ServerError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(err.to_string(), "server error [-32601]: Method not found");
    }
}
