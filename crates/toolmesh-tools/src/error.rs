use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tool-level failures, shared across the registry and the HTTP surface.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("{tool_name} failed: {message}")]
    Execution { tool_name: String, message: String },

    #[error("provider '{provider}' connection failed: {message}")]
    ConnectionFailed { provider: String, message: String },

    #[error("provider '{0}' is not connected")]
    NotConnected(String),
}

impl ToolError {
    pub fn execution<T: Into<String>, M: Into<String>>(tool_name: T, message: M) -> Self {
        ToolError::Execution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    pub fn connection_failed<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        ToolError::ConnectionFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// True when the caller should see this as a 404 rather than a 5xx.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ToolError::UnknownTool(_))
    }
}
