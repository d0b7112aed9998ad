//! Durable stores
//!
//! The dispatch core only talks to these traits. `SqliteStore` is the default
//! implementation wired up by the binary.

pub mod db;
pub mod models;

pub use db::SqliteStore;
pub use models::{ActivityEntry, Prompt, PromptStatus, Session, SessionEnd};

use crate::error::AppError;
use async_trait::async_trait;

/// Read and update prompts
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Get a prompt by ID
    async fn get_prompt(&self, id: &str) -> Result<Option<Prompt>, AppError>;

    /// Set a prompt's status
    async fn update_status(&self, id: &str, status: PromptStatus) -> Result<(), AppError>;

    /// Atomically move a prompt from ready to sent and record the agent.
    /// Returns false if the prompt was not ready.
    async fn claim(&self, id: &str, agent_id: &str) -> Result<bool, AppError>;

    /// Undo `claim`: sent -> ready, agent cleared. Returns false if the
    /// prompt was no longer sent.
    async fn unclaim(&self, id: &str) -> Result<bool, AppError>;
}

/// Create and end sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create an active session
    async fn create_session(
        &self,
        project_id: &str,
        agent_id: &str,
        prompt_id: &str,
    ) -> Result<Session, AppError>;

    /// End a session. Only the first call for a session ends it.
    async fn end_session(&self, id: &str) -> Result<SessionEnd, AppError>;

    /// Get a session by ID
    async fn get_session(&self, id: &str) -> Result<Option<Session>, AppError>;
}

/// Best-effort audit trail
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Append an entry
    async fn record(&self, entry: &ActivityEntry) -> Result<(), AppError>;
}
