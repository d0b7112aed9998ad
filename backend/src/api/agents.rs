//! Agent listing API handler
//!
//! Agents are not created over HTTP; they appear when their socket connects.

use crate::error::AppError;
use crate::state::{AgentConnection, AgentId, AgentStatus, AppState, ProjectId};
use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent response type
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Agent identity
    pub agent_id: AgentId,
    /// Owning project
    pub project_id: ProjectId,
    /// Current status (idle, busy, offline)
    pub status: AgentStatus,
    /// When the current connection was established
    pub connected_at: DateTime<Utc>,
}

impl From<&AgentConnection> for AgentResponse {
    fn from(conn: &AgentConnection) -> Self {
        Self {
            agent_id: conn.agent_id.clone(),
            project_id: conn.project_id.clone(),
            status: conn.status,
            connected_at: conn.connected_at,
        }
    }
}

/// Agents list response
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentsListResponse {
    /// Connected agents, sorted by id
    pub agents: Vec<AgentResponse>,
    /// Number of agents
    pub count: usize,
}

/// GET /api/projects/:project_id/agents - List agents connected for a project
pub async fn list_project_agents(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> Result<Json<AgentsListResponse>, AppError> {
    let agents: Vec<AgentResponse> = state
        .registry
        .list_by_project(&project_id)
        .iter()
        .map(AgentResponse::from)
        .collect();

    Ok(Json(AgentsListResponse {
        count: agents.len(),
        agents,
    }))
}
