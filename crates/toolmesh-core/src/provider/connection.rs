//! A connection to one external tool provider.
//!
//! The endpoint string picks the transport: a `.py` or `.js` script path is
//! spawned as a child process speaking MCP over stdio; an http(s) URL is
//! dialed as a persistent SSE stream. Anything else is a configuration error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rmcp::model::CallToolRequestParam;
use rmcp::service::{RoleClient, RunningService, ServiceExt};
use rmcp::transport::sse_client::SseClientConfig;
use rmcp::transport::{ConfigureCommandExt, SseClientTransport, TokioChildProcess};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use toolmesh_tools::{ResultContent, ToolDescriptor, ToolError};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    PythonScript(PathBuf),
    NodeScript(PathBuf),
    Sse(String),
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.starts_with("http") {
            Ok(Endpoint::Sse(raw.to_string()))
        } else if raw.ends_with(".py") {
            Ok(Endpoint::PythonScript(PathBuf::from(raw)))
        } else if raw.ends_with(".js") {
            Ok(Endpoint::NodeScript(PathBuf::from(raw)))
        } else {
            Err(Error::configuration(format!(
                "provider endpoint must be a .py or .js script or an http(s) URL, got '{raw}'"
            )))
        }
    }
}

type Client = RunningService<RoleClient, ()>;

pub struct ProviderConnection {
    provider_name: String,
    client: Arc<RwLock<Option<Client>>>,
}

impl ProviderConnection {
    /// Dial the endpoint, perform the MCP handshake, and verify the provider
    /// answers a tool listing. Returns a live connection whose
    /// `provider_name` comes from the provider's own announcement.
    pub async fn connect(raw_endpoint: &str) -> Result<Self> {
        let endpoint = Endpoint::parse(raw_endpoint)?;

        let client = match &endpoint {
            Endpoint::PythonScript(path) | Endpoint::NodeScript(path) => {
                let command = match endpoint {
                    Endpoint::NodeScript(_) => "node",
                    _ => "python",
                };
                let (child, stderr) =
                    TokioChildProcess::builder(Command::new(command).configure(|cmd| {
                        cmd.arg(path);
                    }))
                    .stderr(std::process::Stdio::piped())
                    .spawn()
                    .map_err(|e| {
                        ToolError::connection_failed(
                            raw_endpoint,
                            format!("failed to spawn provider process: {e}"),
                        )
                    })?;

                if let Some(stderr) = stderr {
                    let endpoint_for_log = raw_endpoint.to_string();
                    tokio::spawn(async move {
                        use tokio::io::{AsyncBufReadExt, BufReader};
                        let mut reader = BufReader::new(stderr);
                        let mut line = String::new();
                        while let Ok(len) = reader.read_line(&mut line).await {
                            if len == 0 {
                                break;
                            }
                            debug!(target: "provider", "[{}] {}", endpoint_for_log, line.trim());
                            line.clear();
                        }
                    });
                }

                ().serve(child).await.map_err(|e| {
                    ToolError::connection_failed(raw_endpoint, format!("handshake failed: {e}"))
                })?
            }
            Endpoint::Sse(url) => {
                let http_client = reqwest::Client::builder()
                    .connect_timeout(HANDSHAKE_TIMEOUT)
                    .build()
                    .map_err(|e| {
                        ToolError::connection_failed(
                            raw_endpoint,
                            format!("failed to build HTTP client: {e}"),
                        )
                    })?;
                let transport = SseClientTransport::start_with_client(
                    http_client,
                    SseClientConfig {
                        sse_endpoint: url.clone().into(),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| {
                    ToolError::connection_failed(
                        raw_endpoint,
                        format!("failed to open SSE stream: {e}"),
                    )
                })?;

                ().serve(transport).await.map_err(|e| {
                    ToolError::connection_failed(raw_endpoint, format!("handshake failed: {e}"))
                })?
            }
        };

        let provider_name = client
            .peer_info()
            .map(|info| info.server_info.name.to_string())
            .unwrap_or_else(|| raw_endpoint.to_string());

        // A provider that cannot enumerate tools is as good as unreachable.
        let tools = tokio::time::timeout(HANDSHAKE_TIMEOUT, client.list_all_tools())
            .await
            .map_err(|_| {
                ToolError::connection_failed(&provider_name, "timed out listing tools".to_string())
            })?
            .map_err(|e| {
                ToolError::connection_failed(&provider_name, format!("failed to list tools: {e}"))
            })?;
        debug!(
            provider = %provider_name,
            tool_count = tools.len(),
            "provider connected"
        );

        Ok(Self {
            provider_name,
            client: Arc::new(RwLock::new(Some(client))),
        })
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub async fn list_tools(&self) -> std::result::Result<Vec<ToolDescriptor>, ToolError> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| ToolError::NotConnected(self.provider_name.clone()))?;

        let tools = client
            .list_all_tools()
            .await
            .map_err(|e| ToolError::connection_failed(&self.provider_name, e.to_string()))?;

        Ok(tools
            .into_iter()
            .map(|tool| {
                let description = match tool.description.as_deref() {
                    Some(desc) if !desc.is_empty() => desc.to_string(),
                    _ => format!("Tool '{}' from provider '{}'", tool.name, self.provider_name),
                };
                let input_schema = serde_json::Value::Object(tool.input_schema.as_ref().clone());
                ToolDescriptor::new(tool.name.to_string(), description, input_schema)
            })
            .collect())
    }

    /// Invoke a tool by its provider-native name.
    ///
    /// A provider-reported failure (`is_error`) raises `ToolError::Execution`;
    /// an error payload inside a successful result is returned as content.
    pub async fn call_tool(
        &self,
        original_name: &str,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<Vec<ResultContent>, ToolError> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| ToolError::NotConnected(self.provider_name.clone()))?;

        let arguments = if args.is_empty() { None } else { Some(args) };
        let result = client
            .call_tool(CallToolRequestParam {
                name: original_name.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| ToolError::execution(original_name, e.to_string()))?;

        let contents: Vec<ResultContent> = result
            .content
            .into_iter()
            .flatten()
            .map(|content| match content.raw {
                rmcp::model::RawContent::Text(text) => ResultContent::Text { text: text.text },
                rmcp::model::RawContent::Image(image) => ResultContent::Binary {
                    data: image.data,
                    mime_type: image.mime_type,
                },
                rmcp::model::RawContent::Audio(audio) => ResultContent::Binary {
                    data: audio.raw.data,
                    mime_type: audio.raw.mime_type,
                },
                rmcp::model::RawContent::Resource(resource) => ResultContent::Resource {
                    resource: serde_json::to_value(&resource.resource)
                        .unwrap_or(serde_json::Value::Null),
                },
            })
            .collect();

        if result.is_error == Some(true) {
            let message = contents
                .iter()
                .filter_map(ResultContent::as_text)
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ToolError::execution(original_name, message));
        }

        Ok(contents)
    }

    /// Tear down the transport, terminating any child process. Safe to call
    /// more than once; only the first call releases anything.
    pub async fn close(&self) {
        if let Some(client) = self.client.write().await.take() {
            if let Err(e) = client.cancel().await {
                warn!(provider = %self.provider_name, error = %e, "error closing provider connection");
            }
        }
    }
}

impl Drop for ProviderConnection {
    fn drop(&mut self) {
        let client = self.client.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Some(client) = client.write().await.take() {
                    let _ = client.cancel().await;
                }
            });
        }
    }
}
