//! Inference Client: Gemini API client for tool-augmented generation.
//!
//! This module handles all communication with the model endpoint:
//! - Conversation content types (turns, parts, function calls/responses)
//! - Tool declarations in the shape the API expects
//! - Non-streaming `generateContent` requests
//! - Model configuration and environment interpolation
//!
//! The conversation loop depends on the [`ResponseDriver`] trait, so the
//! endpoint can be swapped or scripted in tests.

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

// Re-exports for convenience
pub use client::{GeminiClient, ResponseDriver};
pub use config::ModelConfig;
pub use errors::InferenceError;
pub use types::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, ModelResponse, ModelToolSpec,
    Part, PartKind, Role,
};
