//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;
use crate::mcp_client::McpError;

/// Errors that can end a single `process` call.
///
/// None of these tear down the tool session.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No tool session is established.
    #[error("not connected to a tool server")]
    NotConnected,

    /// The live tool catalog could not be fetched.
    #[error("tool catalog unavailable: {0}")]
    Catalog(#[source] McpError),

    /// The model call failed.
    #[error("model call failed: {0}")]
    Generation(#[from] InferenceError),

    /// The requested tool could not be run.
    #[error("tool '{tool}' failed: {reason}")]
    ToolInvocation { tool: String, reason: String },
}

impl AgentError {
    /// Build a `ToolInvocation` error from the session failure.
    pub fn tool(tool: impl Into<String>, err: &McpError) -> Self {
        AgentError::ToolInvocation {
            tool: tool.into(),
            reason: err.to_string(),
        }
    }
}
