use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::config::{ProvidersConfig, SandboxConfig, StubConfig};
use crate::provider::ToolManager;
use crate::sandbox::CodeExecutor;
use crate::session::{SessionManager, StreamEvent, StreamState, StreamType};
use crate::test_support::{reserve_local_addr, start_sse_provider};

fn executor_without_providers() -> CodeExecutor {
    let tools = Arc::new(ToolManager::new());
    let sessions = Arc::new(SessionManager::new(tools, StubConfig::default()));
    CodeExecutor::new(sessions, &SandboxConfig::default())
}

async fn executor_with_provider(stubs: StubConfig) -> (CodeExecutor, tokio_util::sync::CancellationToken) {
    let addr = reserve_local_addr().await.unwrap();
    let ct = start_sse_provider(&addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let tools = Arc::new(ToolManager::new());
    tools
        .ready(&ProvidersConfig {
            endpoints: vec![format!("http://{addr}/sse")],
            allowlists: HashMap::new(),
        })
        .await;
    let sessions = Arc::new(SessionManager::new(tools, stubs));
    (CodeExecutor::new(sessions, &SandboxConfig::default()), ct)
}

async fn drain_until_terminal(executor: &CodeExecutor, session_id: &str) -> Vec<StreamEvent> {
    let session = executor.sessions().get(session_id).await.unwrap();
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), session.next_event())
            .await
            .unwrap()
            .unwrap();
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn print_output_is_captured() {
    let executor = executor_without_providers();
    let outcome = executor.execute("print(1 + 1)", "s-print", None).await.unwrap();
    assert_eq!(outcome.output, "2\n");
    assert!(outcome.error.is_none());
    assert!(outcome.elapsed_secs() < 5.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn globals_persist_across_submissions() {
    let executor = executor_without_providers();
    executor.execute("x = 41", "s-persist", None).await.unwrap();
    let outcome = executor.execute("print(x + 1)", "s-persist", None).await.unwrap();
    assert_eq!(outcome.output, "42\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn compile_errors_are_reported_not_raised() {
    let executor = executor_without_providers();
    let outcome = executor
        .execute("this is not a program", "s-compile", None)
        .await
        .unwrap();
    let error = outcome.error.unwrap();
    assert!(error.starts_with("CodeCompileError:"), "{error}");
}

#[tokio::test(flavor = "multi_thread")]
async fn runtime_errors_carry_the_message() {
    let executor = executor_without_providers();
    let outcome = executor.execute("error('boom')", "s-runtime", None).await.unwrap();
    let error = outcome.error.unwrap();
    assert!(error.starts_with("CodeRuntimeError:"), "{error}");
    assert!(error.contains("boom"));
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_returns_early_with_partial_output() {
    let executor = executor_without_providers();
    let code = r#"
        print("before")
        local t = os.clock()
        while os.clock() - t < 5 do end
        print("after")
    "#;
    let started = std::time::Instant::now();
    let outcome = executor
        .execute(code, "s-timeout", Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    let error = outcome.error.unwrap();
    assert!(error.starts_with("CodeTimeoutError:"), "{error}");
    assert_eq!(outcome.output, "before\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn late_output_from_a_timed_out_run_stays_out_of_the_next_capture() {
    let executor = executor_without_providers();
    let slow = r#"
        local t = os.clock()
        while os.clock() - t < 3 do end
        print("late")
    "#;
    let outcome = executor
        .execute(slow, "s-leak", Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(outcome.error.unwrap().starts_with("CodeTimeoutError:"));

    // Waits on the VM lock until the timed-out worker finishes, then runs
    // against a freshly reset capture.
    let outcome = executor
        .execute(r#"print("clean")"#, "s-leak", None)
        .await
        .unwrap();
    assert_eq!(outcome.output, "clean\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn every_execution_emits_the_event_triad() {
    let executor = executor_without_providers();
    executor.execute("print('hi')", "s-triad", None).await.unwrap();

    let events = drain_until_terminal(&executor, "s-triad").await;
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].stream_type, StreamType::ToolResult);
    assert_eq!(events[0].state, StreamState::Start);
    assert_eq!(events[1].stream_type, StreamType::CodeResult);
    assert_eq!(events[1].state, StreamState::Running);
    assert_eq!(events[1].content, "hi\n");
    assert!(events[2].is_terminal());
}

#[tokio::test(flavor = "multi_thread")]
async fn tool_stubs_call_through_the_registry() {
    let (executor, ct) = executor_with_provider(StubConfig::default()).await;

    let outcome = executor
        .execute(r#"print(echo({message = "ping"}))"#, "s-stub", None)
        .await
        .unwrap();
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert_eq!(outcome.output, "ping\n");

    let events = drain_until_terminal(&executor, "s-stub").await;
    // Executor start, stub start, stub result, code result, terminal.
    assert_eq!(events.len(), 5);
    assert_eq!(events[1].sub_type, "echo");
    assert_eq!(events[1].state, StreamState::Start);
    assert_eq!(events[1].extra["tool_name"], json!("echo"));
    assert_eq!(events[2].sub_type, "echo");
    assert_eq!(events[2].state, StreamState::Running);
    assert_eq!(events[2].extra["echo"], json!("ping"));
    assert_eq!(events[3].stream_type, StreamType::CodeResult);
    assert!(events[4].is_terminal());

    ct.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn positional_stub_arguments_map_onto_the_schema() {
    let (executor, ct) = executor_with_provider(StubConfig::default()).await;

    let outcome = executor
        .execute("print(add(2, 3))", "s-positional", None)
        .await
        .unwrap();
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert_eq!(outcome.output, "5\n");

    ct.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn configured_tools_receive_the_session_identity() {
    let stubs = StubConfig {
        session_id_tools: vec!["session_info".to_string()],
        stream_id_tools: Vec::new(),
    };
    let (executor, ct) = executor_with_provider(stubs).await;

    let outcome = executor
        .execute("print(session_info())", "s-identity", None)
        .await
        .unwrap();
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert_eq!(outcome.output, "s-identity\n");

    ct.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn stub_failures_surface_as_runtime_errors() {
    let (executor, ct) = executor_with_provider(StubConfig::default()).await;

    let outcome = executor
        .execute(r#"fail({message = "nope"})"#, "s-fail", None)
        .await
        .unwrap();
    let error = outcome.error.unwrap();
    assert!(error.starts_with("CodeRuntimeError:"), "{error}");
    assert!(error.contains("nope"));

    ct.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_a_session_discards_its_state() {
    let executor = executor_without_providers();
    executor.execute("x = 1", "s-delete", None).await.unwrap();
    assert!(executor.sessions().remove("s-delete").await);
    assert!(!executor.sessions().remove("s-delete").await);

    let outcome = executor.execute("print(x)", "s-delete", None).await.unwrap();
    assert_eq!(outcome.output, "nil\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn external_items_join_the_session_stream() {
    let executor = executor_without_providers();
    let item: StreamEvent = serde_json::from_value(json!({
        "content": "progress",
        "extra": {"step": 3}
    }))
    .unwrap();
    executor.sessions().post_item("s-external", item).await.unwrap();

    let session = executor.sessions().get("s-external").await.unwrap();
    let event = session.next_event().await.unwrap();
    assert_eq!(event.content, "progress");
    assert_eq!(event.extra["step"], json!(3));
}
