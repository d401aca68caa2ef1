//! Sticky proxy tests against real backend listeners.

use std::sync::Arc;

use axum::extract::Request;
use axum::routing::any;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use toolmesh_core::config::ProxyConfig;
use toolmesh_server::{ProxyState, backend_index, proxy_router};

/// Reserve `n` contiguous localhost ports and keep them bound.
async fn bind_range(n: u16) -> (u16, Vec<TcpListener>) {
    for _ in 0..20 {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let start = probe.local_addr().unwrap().port();
        drop(probe);

        let mut listeners = Vec::new();
        for offset in 0..n {
            let Ok(listener) = TcpListener::bind(("127.0.0.1", start + offset)).await else {
                break;
            };
            listeners.push(listener);
        }
        if listeners.len() == usize::from(n) {
            return (start, listeners);
        }
    }
    unreachable!("could not reserve a contiguous port range");
}

/// A backend that reports what it received.
fn backend_router(port: u16) -> Router {
    Router::new().fallback(any(move |request: Request| async move {
        let session_id = request
            .headers()
            .get("session_id")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let method = request.method().to_string();
        let body = axum::body::to_bytes(request.into_body(), 1024 * 1024)
            .await
            .unwrap();
        Json(json!({
            "port": port,
            "session_id": session_id,
            "method": method,
            "body_len": body.len(),
        }))
    }))
}

/// Two real backends plus a proxy in front; returns the proxy URL and the
/// first backend port.
async fn proxy_over_two_backends() -> (String, u16) {
    let (start, listeners) = bind_range(2).await;
    for listener in listeners {
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, backend_router(port)).await.unwrap();
        });
    }

    let config = ProxyConfig {
        backend_host: "127.0.0.1".to_string(),
        backend_start_port: start,
        backend_count: 2,
        timeout_secs: 10,
        ..ProxyConfig::default()
    };
    let state = Arc::new(ProxyState::new(&config).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, proxy_router(state)).await.unwrap();
    });
    (format!("http://{addr}"), start)
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_stick_to_the_hashed_backend() {
    let (proxy, start) = proxy_over_two_backends().await;
    let client = reqwest::Client::new();

    for session_id in ["alpha", "beta", "gamma", "delta"] {
        let expected = start + backend_index(session_id, 2) as u16;
        for _ in 0..3 {
            let body: Value = client
                .get(format!("{proxy}/anything/here"))
                .header("session_id", session_id)
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(body["port"], u64::from(expected), "{session_id}");
            assert_eq!(body["session_id"], session_id);
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_session_header_gets_a_generated_identity() {
    let (proxy, start) = proxy_over_two_backends().await;

    let body: Value = reqwest::get(format!("{proxy}/health")).await.unwrap().json().await.unwrap();
    let port = body["port"].as_u64().unwrap();
    assert!(port == u64::from(start) || port == u64::from(start + 1));
    assert!(!body["session_id"].as_str().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn non_get_requests_are_buffered_through() {
    let (proxy, _) = proxy_over_two_backends().await;

    let body: Value = reqwest::Client::new()
        .post(format!("{proxy}/submit"))
        .header("session_id", "poster")
        .body("hello")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["method"], "POST");
    assert_eq!(body["body_len"], 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn upstream_failure_is_a_500_with_an_error_body() {
    // Port 1 is never listening on localhost.
    let config = ProxyConfig {
        backend_host: "127.0.0.1".to_string(),
        backend_start_port: 1,
        backend_count: 1,
        timeout_secs: 2,
        ..ProxyConfig::default()
    };
    let state = Arc::new(ProxyState::new(&config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, proxy_router(state)).await.unwrap();
    });

    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("upstream"));
}
