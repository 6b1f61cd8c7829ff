//! MCP Client: JSON-RPC over stdio transport for the tool server session.
//!
//! This module handles:
//! - Spawning the tool server child process
//! - JSON-RPC 2.0 communication over process stdio
//! - The MCP handshake, tool discovery and tool invocation
//! - Session lifecycle (connect once, deterministic teardown)
//!
//! The conversation orchestrator only sees the [`ToolSession`] trait; the
//! [`SessionManager`] owns every handle behind it.

pub mod errors;
pub mod lifecycle;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use errors::McpError;
pub use lifecycle::{ResourceStack, SessionManager};
pub use session::{McpSession, ToolSession};
pub use types::{CallToolResult, ContentItem, McpToolDefinition, ServerConfig};
