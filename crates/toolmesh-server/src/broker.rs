//! The broker's HTTP API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use toolmesh_core::config::BrokerConfig;
use toolmesh_core::{CodeExecutor, Error as CoreError, SessionManager, StreamEvent, ToolManager};
use toolmesh_tools::ResultContent;

/// Shared state behind every broker route.
pub struct AppState {
    tools: Arc<ToolManager>,
    executor: CodeExecutor,
    agents: HashMap<String, Vec<String>>,
}

impl AppState {
    pub fn new(tools: Arc<ToolManager>, config: &BrokerConfig) -> Self {
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&tools),
            config.stubs.clone(),
        ));
        Self {
            tools,
            executor: CodeExecutor::new(sessions, &config.sandbox),
            agents: config.agents.clone(),
        }
    }

    pub fn tools(&self) -> &Arc<ToolManager> {
        &self.tools
    }

    fn sessions(&self) -> &Arc<SessionManager> {
        self.executor.sessions()
    }
}

pub fn broker_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/get_tool", get(get_all_tools))
        .route("/get_tool/{agent}", get(get_agent_tools))
        .route("/call_tool/{tool}", post(call_tool))
        .route("/execute", post(execute))
        .route("/submit", post(submit))
        .route("/get_mcp_result/{session_id}", get(get_mcp_result))
        .route("/put_item", post(put_item))
        .route("/stream_put_item", post(stream_put_item))
        .route("/del_session", post(del_session))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn get_all_tools(State(state): State<Arc<AppState>>) -> Json<Value> {
    let tools = state.tools.get_tools().await;
    Json(json!(tools))
}

/// Descriptors scoped to one agent's configured tool list. An agent without
/// configuration sees everything.
async fn get_agent_tools(
    State(state): State<Arc<AppState>>,
    Path(agent): Path<String>,
) -> Json<Value> {
    let mut tools = state.tools.get_tools().await;
    if let Some(allowed) = state.agents.get(&agent) {
        tools.retain(|tool| allowed.iter().any(|name| name == &tool.name));
    }
    Json(json!(tools))
}

async fn call_tool(
    State(state): State<Arc<AppState>>,
    Path(tool): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let args = body.as_object().cloned().unwrap_or_default();
    match state.tools.call_tool(&tool, args).await {
        Ok(contents) => {
            let result = contents
                .into_iter()
                .next()
                .map(ResultContent::into_json)
                .unwrap_or(Value::Null);
            Json(json!({"status": true, "result": result})).into_response()
        }
        Err(e) if e.is_not_found() => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
        Err(e) => Json(json!({"status": false, "result": e.to_string()})).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    code: String,
    #[serde(default)]
    session_id: Option<String>,
    /// Wall-clock limit in seconds; the configured default applies when
    /// absent.
    #[serde(default)]
    timeout: Option<f64>,
}

impl ExecuteRequest {
    fn session_id(&self) -> String {
        self.session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
    }
}

async fn execute(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> Response {
    if request.code.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "code must not be empty"})),
        )
            .into_response();
    }

    let session_id = request.session_id();
    match state
        .executor
        .execute(&request.code, &session_id, request.timeout())
        .await
    {
        Ok(outcome) => Json(json!({
            "output": outcome.output,
            "error": outcome.error,
            "execution_time": outcome.elapsed_secs(),
            "session_id": session_id,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// Fire-and-forget execution; results arrive on the session stream.
async fn submit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> Response {
    if request.code.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "code must not be empty"})),
        )
            .into_response();
    }

    let session_id = request.session_id();
    // The session must exist before this handler returns, so a stream reader
    // that connects immediately after does not see a 404.
    if let Err(e) = state.sessions().get_or_create(&session_id).await {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response();
    }

    let timeout = request.timeout();
    let detached_state = Arc::clone(&state);
    let detached_session = session_id.clone();
    tokio::spawn(async move {
        if let Err(e) = detached_state
            .executor
            .execute(&request.code, &detached_session, timeout)
            .await
        {
            warn!(session_id = %detached_session, error = %e, "detached execution failed");
        }
    });

    Json(json!({"status": "submitted", "session_id": session_id})).into_response()
}

/// Stream a session's queued events as newline-delimited JSON. The terminal
/// marker is written as the final line, then the stream closes; consumers
/// detect completion by reading the marker.
async fn get_mcp_result(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(session) = state.sessions().get(&session_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": CoreError::SessionNotFound(session_id).to_string()})),
        )
            .into_response();
    };

    let stream = async_stream::stream! {
        while let Some(event) = session.next_event().await {
            let terminal = event.is_terminal();
            if let Ok(mut line) = serde_json::to_string(&event) {
                line.push('\n');
                yield Ok::<_, std::convert::Infallible>(line);
            }
            if terminal {
                break;
            }
        }
    };

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct PutItemRequest {
    session_id: String,
    item: StreamEvent,
}

async fn put_item(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PutItemRequest>,
) -> Response {
    match state
        .sessions()
        .post_item(&request.session_id, request.item)
        .await
    {
        Ok(()) => Json(json!({"session_id": request.session_id, "flag": true})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"session_id": request.session_id, "flag": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}

/// Bulk injection: one `{session_id, item}` object per line. Lines are
/// consumed as the body arrives, so a large batch never sits in memory whole.
/// Malformed lines are collected, not fatal.
async fn stream_put_item(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let mut body = request.into_body().into_data_stream();
    let mut pending: Vec<u8> = Vec::new();
    let mut line_number = 0usize;
    let mut processed = 0usize;
    let mut errors = Vec::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("failed to read request body: {e}")})),
                )
                    .into_response();
            }
        };
        pending.extend_from_slice(&chunk);
        while let Some(end) = pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = pending.drain(..=end).collect();
            line_number += 1;
            ingest_item_line(&state, &line[..end], line_number, &mut processed, &mut errors).await;
        }
    }
    if !pending.is_empty() {
        line_number += 1;
        ingest_item_line(&state, &pending, line_number, &mut processed, &mut errors).await;
    }

    Json(json!({
        "status": "success",
        "processed_items": processed,
        "errors": errors,
    }))
    .into_response()
}

async fn ingest_item_line(
    state: &AppState,
    line: &[u8],
    line_number: usize,
    processed: &mut usize,
    errors: &mut Vec<String>,
) {
    if line.iter().all(u8::is_ascii_whitespace) {
        return;
    }
    match serde_json::from_slice::<PutItemRequest>(line) {
        Ok(request) => match state
            .sessions()
            .post_item(&request.session_id, request.item)
            .await
        {
            Ok(()) => *processed += 1,
            Err(e) => errors.push(format!("line {line_number}: {e}")),
        },
        Err(e) => errors.push(format!("line {line_number}: {e}")),
    }
}

#[derive(Debug, Deserialize)]
struct DelSessionQuery {
    session_id: String,
}

async fn del_session(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DelSessionQuery>,
) -> Response {
    if state.sessions().remove(&query.session_id).await {
        Json(json!({
            "status": "success",
            "message": format!("session '{}' deleted", query.session_id),
        }))
        .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "status": "error",
                "message": CoreError::SessionNotFound(query.session_id).to_string(),
            })),
        )
            .into_response()
    }
}
