//! Telemetry snapshot API handler

use crate::error::AppError;
use crate::state::AppState;
use crate::telemetry::Snapshot;
use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;

/// Snapshot query
#[derive(Debug, Default, Deserialize)]
pub struct SnapshotQuery {
    /// Project to scope the snapshot to
    pub project_id: Option<String>,
}

/// GET /api/telemetry - Current fleet state, filtered the same way as a subscribe
pub async fn get_snapshot(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<Snapshot>, AppError> {
    let project_id = query.project_id.filter(|p| !p.trim().is_empty());
    Ok(Json(state.hub.snapshot(project_id.as_deref())))
}
