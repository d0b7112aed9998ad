//! Error types and error handling for the application
//!
//! This module defines custom error types that can be converted to HTTP responses.
//! All errors implement `IntoResponse` to provide consistent error formatting.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::dispatch::DispatchError;

/// Application-level error types
///
/// All errors that can occur in the application are represented by this enum.
/// Each variant implements automatic conversion to HTTP responses via `IntoResponse`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Prompt, agent or session was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entity exists but is in the wrong state for the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation crosses a project boundary
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Target is busy
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Directed send to an agent failed
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    /// Malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error (catch-all for unexpected errors)
    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status this error maps to
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        let message = err.to_string();
        match err {
            DispatchError::PromptNotFound(_) | DispatchError::AgentNotConnected(_) => {
                AppError::NotFound(message)
            }
            DispatchError::PromptNotReady { .. } => AppError::InvalidState(message),
            DispatchError::CrossProject { .. } => AppError::Forbidden(message),
            DispatchError::AgentBusy { .. } => AppError::Conflict(message),
            DispatchError::SendFailed(_) => AppError::BadGateway(message),
            DispatchError::Store(inner) => inner,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
