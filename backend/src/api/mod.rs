//! API module
//!
//! Contains HTTP request handlers and the router that mounts them alongside
//! the websocket endpoints.

pub mod agents;
pub mod dispatch;
pub mod health;
pub mod telemetry;

use crate::state::AppState;
use crate::websocket;
use axum::{
    routing::{get, post},
    Router,
};

/// Build the application router
///
/// Middleware is layered by the caller so tests can drive the bare routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/prompts/:id/dispatch", post(dispatch::dispatch_prompt))
        .route(
            "/api/projects/:project_id/agents",
            get(agents::list_project_agents),
        )
        .route("/api/telemetry", get(telemetry::get_snapshot))
        .route("/ws/agent", get(websocket::agent_socket_handler))
        .route("/ws/telemetry", get(websocket::telemetry_socket_handler))
        .with_state(state)
}
