//! End-to-end websocket tests
//!
//! A real server is bound to an ephemeral port. Agents and observers connect
//! with tokio-tungstenite and prompts are dispatched over HTTP with reqwest.

use agent_dispatch_backend::api;
use agent_dispatch_backend::config::Config;
use agent_dispatch_backend::state::{AppState, REPLACED_REASON};
use agent_dispatch_backend::store::{Prompt, PromptStatus, PromptStore, SqliteStore};
use agent_dispatch_backend::telemetry::IntervalFlushTimer;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    state: AppState,
    _temp_dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let store = SqliteStore::new(db_path.to_str().unwrap()).await.unwrap();

        let mut config = Config::default();
        config.telemetry.flush_interval_ms = 20;
        let timer = Arc::new(IntervalFlushTimer::new(config.flush_interval()));
        let state = AppState::new(config, Arc::new(store), timer);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = api::router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            _temp_dir: temp_dir,
        }
    }

    fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn connect(&self, path: &str) -> Socket {
        let (socket, _) = connect_async(format!("ws://{}{}", self.addr, path))
            .await
            .unwrap();
        socket
    }

    async fn connect_agent(&self, agent_id: &str, project_id: &str) -> Socket {
        let socket = self
            .connect(&format!("/ws/agent?agent_id={agent_id}&project_id={project_id}"))
            .await;
        self.wait_for_agents(project_id, |agents| {
            agents.iter().any(|a| a["agent_id"] == agent_id)
        })
        .await;
        socket
    }

    async fn agents(&self, project_id: &str) -> Vec<Value> {
        let body: Value = reqwest::get(self.http(&format!("/api/projects/{project_id}/agents")))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["agents"].as_array().cloned().unwrap_or_default()
    }

    /// Poll the agent list until `ready` holds; the socket task registers
    /// the agent after the upgrade response has already gone out.
    async fn wait_for_agents(&self, project_id: &str, ready: impl Fn(&[Value]) -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if ready(&self.agents(project_id).await) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "agent list never settled"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn seed_prompt(&self, id: &str, project_id: &str) {
        let prompt = Prompt::new(id.into(), project_id.into(), format!("do {id}"), PromptStatus::Ready);
        self.state.store.create_prompt(&prompt).await.unwrap();
    }

    async fn dispatch(&self, prompt_id: &str, agent_id: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(self.http(&format!("/api/prompts/{prompt_id}/dispatch")))
            .json(&json!({ "agent_id": agent_id }))
            .send()
            .await
            .unwrap()
    }
}

/// Next JSON text frame, skipping control frames
async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Read observer frames, unwrapping batches, until an event of `kind` shows up
async fn collect_until(socket: &mut Socket, kind: &str) -> Vec<Value> {
    let mut events = Vec::new();
    loop {
        let frame = next_json(socket).await;
        if frame["type"] == "batch" {
            events.extend(frame["events"].as_array().unwrap().iter().cloned());
        } else {
            events.push(frame);
        }
        if events.iter().any(|e| e["type"] == kind) {
            return events;
        }
    }
}

#[tokio::test]
async fn test_dispatch_and_complete_round_trip() {
    let server = TestServer::start().await;
    server.seed_prompt("r1", "p1").await;

    let mut observer = server.connect("/ws/telemetry?project_id=p1").await;
    let snapshot = next_json(&mut observer).await;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["completed_count"], 0);

    let mut agent = server.connect_agent("a1", "p1").await;

    let response = server.dispatch("r1", "a1").await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let outcome: Value = response.json().await.unwrap();
    let session_id = outcome["session_id"].as_str().unwrap().to_string();

    let command = next_json(&mut agent).await;
    assert_eq!(command["type"], "execute_prompt");
    assert_eq!(command["prompt_id"], "r1");
    assert_eq!(command["session_id"], session_id.as_str());

    // A second dispatch while the agent is busy is rejected
    server.seed_prompt("r2", "p1").await;
    let busy = server.dispatch("r2", "a1").await;
    assert_eq!(busy.status(), reqwest::StatusCode::CONFLICT);

    agent
        .send(Message::Text(
            json!({
                "type": "execution_complete",
                "session_id": session_id,
                "usage": {"input_tokens": 12, "output_tokens": 4},
            })
            .to_string(),
        ))
        .await
        .unwrap();

    let events = collect_until(&mut observer, "execution_completed").await;
    let kinds: Vec<&str> = events.iter().filter_map(|e| e["type"].as_str()).collect();
    assert!(kinds.contains(&"agent_connected"));
    assert!(kinds.contains(&"execution_started"));
    let completed = events
        .iter()
        .find(|e| e["type"] == "execution_completed")
        .unwrap();
    assert_eq!(completed["execution"]["session_id"], session_id.as_str());
    assert_eq!(completed["execution"]["usage"]["input_tokens"], 12);
    assert!(events.iter().all(|e| e["project_id"] == "p1"));

    let prompt = server.state.store.get_prompt("r1").await.unwrap().unwrap();
    assert_eq!(prompt.status_enum(), PromptStatus::Done);
    assert_eq!(server.state.hub.completed_count(Some("p1")), 1);
}

#[tokio::test]
async fn test_agent_ping_pong() {
    let server = TestServer::start().await;
    let mut agent = server.connect_agent("a1", "p1").await;

    agent
        .send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();
    let reply = next_json(&mut agent).await;
    assert_eq!(reply["type"], "pong");
}

#[tokio::test]
async fn test_reconnect_replaces_previous_socket() {
    let server = TestServer::start().await;
    let mut first = server.connect_agent("a1", "p1").await;
    let first_id = server.state.registry.get("a1").unwrap().channel.id().to_string();

    let _second = server.connect("/ws/agent?agent_id=a1&project_id=p1").await;

    let reason = loop {
        let msg = tokio::time::timeout(WAIT, first.next())
            .await
            .expect("timed out waiting for close")
            .expect("socket ended without close frame")
            .unwrap();
        if let Message::Close(frame) = msg {
            break frame.map(|f| f.reason.to_string()).unwrap_or_default();
        }
    };
    assert_eq!(reason, REPLACED_REASON);

    // The stale socket's disconnect must not evict the new connection
    drop(first);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let current = server.state.registry.get("a1").unwrap();
    assert_ne!(current.channel.id(), first_id);
    assert_eq!(server.agents("p1").await.len(), 1);
}

#[tokio::test]
async fn test_disconnect_removes_agent() {
    let server = TestServer::start().await;
    let mut agent = server.connect_agent("a1", "p1").await;
    agent.close(None).await.unwrap();

    server.wait_for_agents("p1", |agents| agents.is_empty()).await;
    assert!(server.state.registry.get("a1").is_none());
}

#[tokio::test]
async fn test_observer_only_sees_own_project() {
    let server = TestServer::start().await;
    let mut observer = server.connect("/ws/telemetry?project_id=p1").await;
    assert_eq!(next_json(&mut observer).await["type"], "snapshot");

    let _other = server.connect_agent("b1", "p2").await;
    let _mine = server.connect_agent("a1", "p1").await;

    let events = collect_until(&mut observer, "agent_connected").await;
    for event in &events {
        assert_eq!(event["project_id"], "p1");
    }
    assert!(events
        .iter()
        .any(|e| e["type"] == "agent_connected" && e["agent"]["agent_id"] == "a1"));
}

#[tokio::test]
async fn test_agent_handshake_requires_project() {
    let server = TestServer::start().await;
    let result = connect_async(format!("ws://{}/ws/agent?agent_id=a1", server.addr)).await;
    assert!(result.is_err());
    assert!(server.state.registry.is_empty());
}
