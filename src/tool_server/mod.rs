//! Product tool server: an MCP stdio server backed by SQLite.
//!
//! Submodules:
//! - `db`: Product schema, sample catalog and queries (`rusqlite`)
//! - `tools`: Tool definitions and handlers
//! - `server`: Line-delimited JSON-RPC loop
//! - `errors`: Tool server error types
//!
//! Run through the `product-server` binary; `SessionManager::connect`
//! spawns it like any other MCP server.

pub mod db;
pub mod errors;
pub mod server;
pub mod tools;

// Re-exports for convenience
pub use db::{NewProduct, Product, ProductStore};
pub use errors::ToolServerError;
pub use server::serve;
