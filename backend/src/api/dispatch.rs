//! Dispatch API handler

use crate::dispatch::DispatchOutcome;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;

/// Dispatch request
#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    /// Agent that should run the prompt
    pub agent_id: String,
}

/// POST /api/prompts/:id/dispatch - Send a ready prompt to an idle agent
///
/// # Arguments
/// * `state` - Application state
/// * `prompt_id` - Prompt to dispatch
/// * `request` - Target agent
///
/// # Returns
/// * `Ok(Json<DispatchOutcome>)` - Session and execution created for the dispatch
/// * `Err(AppError)` - The first failed precondition, or a send failure
pub async fn dispatch_prompt(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<DispatchOutcome>, AppError> {
    let agent_id = request.agent_id.trim();
    if agent_id.is_empty() {
        return Err(AppError::InvalidRequest("agent_id is required".to_string()));
    }

    let outcome = state.coordinator.dispatch(&prompt_id, agent_id).await?;
    Ok(Json(outcome))
}
