//! Tool server error types.

use thiserror::Error;

/// Errors raised by the product store and the tool dispatcher.
#[derive(Debug, Error)]
pub enum ToolServerError {
    /// SQLite operation failed.
    #[error("database error: {reason}")]
    Database { reason: String },

    /// A stored row could not be decoded.
    #[error("corrupt product row {id}: {reason}")]
    CorruptRow { id: i64, reason: String },

    /// `tools/call` named a tool this server does not have.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// Reading stdin or writing stdout failed.
    #[error("stdio error: {reason}")]
    Io { reason: String },
}

impl From<rusqlite::Error> for ToolServerError {
    fn from(e: rusqlite::Error) -> Self {
        ToolServerError::Database {
            reason: e.to_string(),
        }
    }
}

impl From<std::io::Error> for ToolServerError {
    fn from(e: std::io::Error) -> Self {
        ToolServerError::Io {
            reason: e.to_string(),
        }
    }
}
