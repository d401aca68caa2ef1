//! Sticky session proxy.
//!
//! Fans requests out over a contiguous range of broker ports. The backend is
//! chosen purely from the `session_id` request header, so every request of a
//! session lands on the instance holding that session's state.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use futures::TryStreamExt;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use toolmesh_core::config::ProxyConfig;

const MAX_BUFFERED_BODY: usize = 256 * 1024 * 1024;

pub struct ProxyState {
    client: reqwest::Client,
    backend_host: String,
    start_port: u16,
    backend_count: usize,
}

impl ProxyState {
    pub fn new(config: &ProxyConfig) -> Result<Self, toolmesh_core::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                toolmesh_core::Error::configuration(format!("failed to build proxy client: {e}"))
            })?;
        Ok(Self {
            client,
            backend_host: config.backend_host.clone(),
            start_port: config.backend_start_port,
            backend_count: config.backend_count.max(1),
        })
    }
}

/// Backend index for a session: first 8 bytes of `SHA-256(session_id)` as a
/// big-endian integer, mod the backend count.
pub fn backend_index(session_id: &str, backend_count: usize) -> usize {
    let digest = Sha256::digest(session_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % backend_count.max(1) as u64) as usize
}

pub fn proxy_router(state: Arc<ProxyState>) -> Router {
    Router::new().fallback(any(forward)).with_state(state)
}

async fn forward(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let session_id = request
        .headers()
        .get("session_id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let index = backend_index(&session_id, state.backend_count);
    let port = state.start_port + index as u16;
    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_string();
    let target = format!("http://{}:{}{}", state.backend_host, port, path_and_query);
    debug!(session_id = %session_id, backend = index, path = %path_and_query, "forwarding");

    let method = request.method().clone();
    let stream_response = method == Method::GET;
    let headers = request.headers().clone();
    let body = match axum::body::to_bytes(request.into_body(), MAX_BUFFERED_BODY).await {
        Ok(body) => body,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({"error": format!("failed to read request body: {e}")})),
            )
                .into_response();
        }
    };

    let mut upstream = state.client.request(method, &target);
    for (name, value) in &headers {
        if name != header::HOST {
            upstream = upstream.header(name, value);
        }
    }
    upstream = upstream.header("session_id", &session_id);
    if !body.is_empty() {
        upstream = upstream.body(body);
    }

    let response = match upstream.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(target = %target, error = %e, "upstream request failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({"error": format!("upstream request failed: {e}")})),
            )
                .into_response();
        }
    };

    let status = response.status();
    let content_type = response.headers().get(header::CONTENT_TYPE).cloned();

    // GET responses stream live (event streams are long-lived); everything
    // else is buffered whole.
    let body = if stream_response {
        Body::from_stream(response.bytes_stream().map_err(std::io::Error::other))
    } else {
        match response.bytes().await {
            Ok(bytes) => Body::from(bytes),
            Err(e) => {
                warn!(target = %target, error = %e, "failed to read upstream response");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    axum::Json(json!({"error": format!("upstream response failed: {e}")})),
                )
                    .into_response();
            }
        }
    };

    let mut out = Response::new(body);
    *out.status_mut() = status;
    if let Some(content_type) = content_type {
        out.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn routing_is_a_pure_function_of_the_session_id() {
        let first = backend_index("session-abc", 8);
        for _ in 0..100 {
            assert_eq!(backend_index("session-abc", 8), first);
        }
        assert!(first < 8);
    }

    #[test]
    fn buckets_stay_within_twice_the_mean_over_many_sessions() {
        let n = 8usize;
        let ids = 10_000usize;
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for _ in 0..ids {
            let id = Uuid::new_v4().to_string();
            *counts.entry(backend_index(&id, n)).or_default() += 1;
        }
        let mean = ids / n;
        for (bucket, count) in counts {
            assert!(
                count <= mean * 2,
                "bucket {bucket} holds {count} of {ids} sessions"
            );
        }
    }

    #[test]
    fn single_backend_always_routes_to_zero() {
        assert_eq!(backend_index("anything", 1), 0);
        assert_eq!(backend_index("anything", 0), 0);
    }
}
