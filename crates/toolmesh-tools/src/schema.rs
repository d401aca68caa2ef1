use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Derive the registry-visible name for a provider-native tool name.
///
/// Exposed names double as identifiers inside session execution contexts, so
/// every character outside `[A-Za-z0-9_]` collapses to `_` and a leading digit
/// gets an underscore prefix. `"search-papers"` becomes `"search_papers"`.
pub fn exposed_name(original: &str) -> String {
    let mut out = String::with_capacity(original.len() + 1);
    for (i, c) in original.chars().enumerate() {
        if i == 0 && c.is_ascii_digit() {
            out.push('_');
        }
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    out
}

/// One aggregated tool as seen through the registry.
///
/// `name` is the exposed (normalized) name; `original_name` is what the owning
/// provider expects in a call. `input_schema` is the provider's JSON Schema
/// verbatim. Immutable once aggregation finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub original_name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(original_name: impl Into<String>, description: String, input_schema: Value) -> Self {
        let original_name = original_name.into();
        Self {
            name: exposed_name(&original_name),
            original_name,
            description,
            input_schema,
        }
    }

    /// Schema properties in declaration order.
    pub fn properties(&self) -> Vec<(&str, &Value)> {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.iter().map(|(k, v)| (k.as_str(), v)).collect())
            .unwrap_or_default()
    }

    pub fn required(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_required(&self, param: &str) -> bool {
        self.required().contains(&param)
    }

    /// Declared default for an optional parameter, if the schema carries one.
    pub fn default_of(&self, param: &str) -> Option<&Value> {
        self.input_schema
            .get("properties")
            .and_then(|p| p.get(param))
            .and_then(|p| p.get("default"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hyphens_become_underscores() {
        assert_eq!(exposed_name("search-papers-enhanced"), "search_papers_enhanced");
    }

    #[test]
    fn already_safe_names_pass_through() {
        assert_eq!(exposed_name("get_weather"), "get_weather");
    }

    #[test]
    fn dots_and_leading_digits_are_normalized() {
        assert_eq!(exposed_name("v2.lookup"), "v2_lookup");
        assert_eq!(exposed_name("3d-render"), "_3d_render");
    }

    #[test]
    fn descriptor_reads_schema_defaults() {
        let desc = ToolDescriptor::new(
            "fetch-page",
            "Fetch a page".to_string(),
            json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string"},
                    "max_bytes": {"type": "integer", "default": 4096}
                },
                "required": ["url"]
            }),
        );
        assert_eq!(desc.name, "fetch_page");
        assert!(desc.is_required("url"));
        assert!(!desc.is_required("max_bytes"));
        assert_eq!(desc.default_of("max_bytes"), Some(&json!(4096)));
        let order: Vec<&str> = desc.properties().iter().map(|(k, _)| *k).collect();
        assert_eq!(order, vec!["url", "max_bytes"]);
    }
}
