//! In-process MCP providers for tests.

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::tool::Parameters;
use rmcp::model::{CallToolResult, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo};
use rmcp::schemars;
use rmcp::transport::sse_server::{SseServer, SseServerConfig};
use rmcp::{ErrorData, ServerHandler, tool, tool_handler, tool_router};
use tokio_util::sync::CancellationToken;

/// A provider exposing a few simple tools, one of them with a hyphenated
/// name so name-normalization round-trips get exercised.
#[derive(Debug, Clone)]
pub struct TestToolService {
    tool_router: ToolRouter<TestToolService>,
}

impl TestToolService {
    pub fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }
}

impl Default for TestToolService {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct EchoRequest {
    #[schemars(description = "Message to echo back")]
    pub message: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct AddRequest {
    #[schemars(description = "First number to add")]
    pub a: f64,
    #[schemars(description = "Second number to add")]
    pub b: f64,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct UpperRequest {
    #[schemars(description = "Text to upper-case")]
    pub text: String,
    #[schemars(description = "Suffix appended to the result")]
    #[serde(default)]
    pub suffix: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SessionInfoRequest {
    #[schemars(description = "Session identity, if the caller has one")]
    #[serde(default)]
    pub session_id: Option<String>,
}

#[tool_router]
impl TestToolService {
    #[tool(description = "Echo back the input message")]
    async fn echo(
        &self,
        Parameters(EchoRequest { message }): Parameters<EchoRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(CallToolResult::success(vec![rmcp::model::Content::text(
            message,
        )]))
    }

    #[tool(description = "Add two numbers together")]
    async fn add(
        &self,
        Parameters(AddRequest { a, b }): Parameters<AddRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(CallToolResult::success(vec![rmcp::model::Content::text(
            format!("{}", a + b),
        )]))
    }

    #[tool(name = "to-upper", description = "Upper-case the input text")]
    async fn to_upper(
        &self,
        Parameters(UpperRequest { text, suffix }): Parameters<UpperRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut out = text.to_uppercase();
        if let Some(suffix) = suffix {
            out.push_str(&suffix);
        }
        Ok(CallToolResult::success(vec![rmcp::model::Content::text(
            out,
        )]))
    }

    #[tool(description = "Report the session identity passed by the caller")]
    async fn session_info(
        &self,
        Parameters(SessionInfoRequest { session_id }): Parameters<SessionInfoRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(CallToolResult::success(vec![rmcp::model::Content::text(
            session_id.unwrap_or_else(|| "none".to_string()),
        )]))
    }

    #[tool(description = "Always fails with the given message")]
    async fn fail(
        &self,
        Parameters(EchoRequest { message }): Parameters<EchoRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(CallToolResult::error(vec![rmcp::model::Content::text(
            message,
        )]))
    }
}

#[tool_handler]
impl ServerHandler for TestToolService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "test-tool-service".to_string(),
                version: "1.0.0".to_string(),
            },
            instructions: None,
        }
    }
}

/// Serve `TestToolService` over SSE on `bind_addr`. Cancel the returned token
/// to shut it down.
pub async fn start_sse_provider(
    bind_addr: &str,
) -> Result<CancellationToken, Box<dyn std::error::Error + Send + Sync>> {
    let config = SseServerConfig {
        bind: bind_addr.parse()?,
        sse_path: "/sse".to_string(),
        post_path: "/message".to_string(),
        ct: CancellationToken::new(),
        sse_keep_alive: None,
    };

    let (sse_server, router) = SseServer::new(config);
    let listener = tokio::net::TcpListener::bind(sse_server.config.bind).await?;

    let ct = sse_server.config.ct.child_token();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        ct.cancelled().await;
    });

    tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!(error = %e, "sse provider shut down with error");
        }
    });

    Ok(sse_server.with_service(TestToolService::new))
}

/// Bind an ephemeral port, release it, and hand back the address. Racy in
/// principle, fine for tests.
pub async fn reserve_local_addr() -> std::io::Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr.to_string())
}
