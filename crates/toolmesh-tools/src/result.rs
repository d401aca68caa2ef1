use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One content item returned by a provider tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultContent {
    Text { text: String },
    Binary { data: String, mime_type: String },
    Resource { resource: Value },
}

impl ResultContent {
    pub fn text(text: impl Into<String>) -> Self {
        ResultContent::Text { text: text.into() }
    }

    /// Collapse into a plain JSON value for API responses and session code.
    ///
    /// Text payloads that parse as JSON are decoded; everything else passes
    /// through as a string or the raw resource value.
    pub fn into_json(self) -> Value {
        match self {
            ResultContent::Text { text } => {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            }
            ResultContent::Binary { data, .. } => Value::String(data),
            ResultContent::Resource { resource } => resource,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResultContent::Text { text } => Some(text),
            _ => None,
        }
    }
}
