//! Events flowing through a session's result stream.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    #[default]
    ToolResult,
    CodeResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Start,
    #[default]
    Running,
    End,
}

/// One item on a session's event stream.
///
/// Events come from three sources with the same shape: tool stubs inside the
/// sandbox, the executor's lifecycle triad, and external producers via the
/// put-item endpoints. Every field defaults so sparse external items
/// deserialize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    #[serde(default)]
    pub stream_type: StreamType,
    #[serde(default)]
    pub sub_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default)]
    pub state: StreamState,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

fn default_origin() -> String {
    "sandbox".to_string()
}

impl StreamEvent {
    pub fn new(
        stream_type: StreamType,
        sub_type: impl Into<String>,
        content: impl Into<String>,
        state: StreamState,
    ) -> Self {
        Self {
            stream_type,
            sub_type: sub_type.into(),
            content: content.into(),
            origin: default_origin(),
            state,
            extra: Map::new(),
        }
    }

    pub fn tool_result(
        sub_type: impl Into<String>,
        content: impl Into<String>,
        state: StreamState,
    ) -> Self {
        Self::new(StreamType::ToolResult, sub_type, content, state)
    }

    pub fn code_result(content: impl Into<String>, state: StreamState) -> Self {
        Self::new(StreamType::CodeResult, "", content, state)
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// An empty-subtype end event closes the consumer's read of the stream.
    pub fn is_terminal(&self) -> bool {
        self.sub_type.is_empty() && self.state == StreamState::End
    }
}
