//! Agent Core: the tool-augmented conversation loop.
//!
//! Submodules:
//! - `catalog`: Converts the MCP tool catalog into model function declarations
//! - `orchestrator`: Runs one query through the model and at most one tool call
//! - `errors`: Agent-level error types

pub mod catalog;
pub mod errors;
pub mod orchestrator;

// Re-exports for convenience
pub use catalog::to_model_declarations;
pub use errors::AgentError;
pub use orchestrator::{Exchange, Orchestrator, NOT_CONNECTED_REPLY};
