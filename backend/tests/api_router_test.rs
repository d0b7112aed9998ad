//! Integration tests for the HTTP router
//!
//! Requests go through the full axum router with `tower::ServiceExt::oneshot`,
//! so routing, extraction and error mapping are all exercised.

use agent_dispatch_backend::api;
use agent_dispatch_backend::config::Config;
use agent_dispatch_backend::state::{AgentChannel, AgentStatus, AppState, OutboundFrame};
use agent_dispatch_backend::store::{Prompt, PromptStatus, PromptStore, SqliteStore};
use agent_dispatch_backend::telemetry::ManualFlushTimer;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Helper to create test AppState backed by a temporary database
async fn create_test_state() -> (AppState, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let store = SqliteStore::new(db_path.to_str().unwrap()).await.unwrap();
    let state = AppState::new(
        Config::default(),
        Arc::new(store),
        Arc::new(ManualFlushTimer::new()),
    );
    (state, temp_dir)
}

async fn seed_prompt(state: &AppState, id: &str, project: &str, status: PromptStatus) {
    let prompt = Prompt::new(id.into(), project.into(), format!("do {id}"), status);
    state.store.create_prompt(&prompt).await.unwrap();
}

async fn send(state: &AppState, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = api::router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn dispatch(state: &AppState, prompt_id: &str, agent_id: &str) -> (StatusCode, Value) {
    send(
        state,
        Method::POST,
        &format!("/api/prompts/{prompt_id}/dispatch"),
        Some(json!({ "agent_id": agent_id })),
    )
    .await
}

#[tokio::test]
async fn test_health() {
    let (state, _temp_dir) = create_test_state().await;
    let (status, body) = send(&state, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_dispatch_over_http() {
    let (state, _temp_dir) = create_test_state().await;
    seed_prompt(&state, "r1", "p1", PromptStatus::Ready).await;
    let (channel, mut rx) = AgentChannel::new();
    state.coordinator.connect_agent("a1", "p1", channel);

    let (status, body) = dispatch(&state, "r1", "a1").await;
    assert_eq!(status, StatusCode::OK);
    let session_id = body["session_id"].as_str().unwrap().to_string();
    assert!(body["execution_id"].as_str().is_some());

    match rx.try_recv().unwrap() {
        OutboundFrame::Text(text) => {
            let frame: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(frame["type"], "execute_prompt");
            assert_eq!(frame["session_id"], session_id.as_str());
            assert_eq!(frame["text"], "do r1");
        }
        other => panic!("unexpected frame: {:?}", other),
    }

    let prompt = state.store.get_prompt("r1").await.unwrap().unwrap();
    assert_eq!(prompt.status_enum(), PromptStatus::Sent);

    let (status, snapshot) = send(&state, Method::GET, "/api/telemetry?project_id=p1", None).await;
    assert_eq!(status, StatusCode::OK);
    let executions = snapshot["executions"].as_array().unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0]["session_id"], session_id.as_str());
}

#[tokio::test]
async fn test_dispatch_error_taxonomy() {
    let (state, _temp_dir) = create_test_state().await;
    seed_prompt(&state, "ready", "p1", PromptStatus::Ready).await;
    seed_prompt(&state, "draft", "p1", PromptStatus::Draft).await;

    let (busy, _busy_rx) = AgentChannel::new();
    state.coordinator.connect_agent("busy", "p1", busy.clone());
    state
        .coordinator
        .report_status("busy", busy.id(), AgentStatus::Busy);
    let (other, _other_rx) = AgentChannel::new();
    state.coordinator.connect_agent("other", "p2", other);

    let cases = [
        ("missing", "busy", StatusCode::NOT_FOUND),
        ("draft", "busy", StatusCode::BAD_REQUEST),
        ("ready", "ghost", StatusCode::NOT_FOUND),
        ("ready", "other", StatusCode::FORBIDDEN),
        ("ready", "busy", StatusCode::CONFLICT),
    ];
    for (prompt_id, agent_id, expected) in cases {
        let (status, body) = dispatch(&state, prompt_id, agent_id).await;
        assert_eq!(status, expected, "{prompt_id} -> {agent_id}");
        assert_eq!(body["status"], expected.as_u16());
        assert!(body["error"].as_str().is_some());
    }

    // Nothing above may have left a trace
    assert_eq!(state.store.count_sessions(false).await.unwrap(), 0);
    let prompt = state.store.get_prompt("ready").await.unwrap().unwrap();
    assert_eq!(prompt.status_enum(), PromptStatus::Ready);
    assert_eq!(state.hub.active_execution_count(), 0);
}

#[tokio::test]
async fn test_list_project_agents() {
    let (state, _temp_dir) = create_test_state().await;
    let (c1, _rx1) = AgentChannel::new();
    let (c2, _rx2) = AgentChannel::new();
    state.coordinator.connect_agent("a1", "p1", c1);
    state.coordinator.connect_agent("a2", "p2", c2);

    let (status, body) = send(&state, Method::GET, "/api/projects/p1/agents", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["agents"][0]["agent_id"], "a1");
    assert_eq!(body["agents"][0]["status"], "idle");
}

#[tokio::test]
async fn test_unscoped_snapshot_covers_all_projects() {
    let (state, _temp_dir) = create_test_state().await;
    let (c1, _rx1) = AgentChannel::new();
    let (c2, _rx2) = AgentChannel::new();
    state.coordinator.connect_agent("a1", "p1", c1);
    state.coordinator.connect_agent("a2", "p2", c2);

    let (status, body) = send(&state, Method::GET, "/api/telemetry", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agents"].as_array().unwrap().len(), 2);
}
