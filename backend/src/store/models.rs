//! Durable data models
//!
//! Prompts, sessions and activity entries as stored in SQLite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Lifecycle of a prompt: draft -> ready -> sent -> done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStatus {
    /// Being edited, not dispatchable
    Draft,
    /// Dispatchable
    Ready,
    /// Handed to an agent
    Sent,
    /// Agent finished the job
    Done,
}

impl PromptStatus {
    /// Convert the status to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptStatus::Draft => "draft",
            PromptStatus::Ready => "ready",
            PromptStatus::Sent => "sent",
            PromptStatus::Done => "done",
        }
    }
}

impl From<&str> for PromptStatus {
    fn from(s: &str) -> Self {
        match s {
            "ready" => PromptStatus::Ready,
            "sent" => PromptStatus::Sent,
            "done" => PromptStatus::Done,
            _ => PromptStatus::Draft,
        }
    }
}

impl fmt::Display for PromptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A natural-language job owned by a project
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Prompt {
    /// Unique identifier for the prompt
    pub id: String,
    /// Owning project
    pub project_id: String,
    /// Prompt text sent to the agent
    pub text: String,
    /// Stored as "draft", "ready", "sent" or "done"
    pub status: String,
    /// Agent the prompt was last dispatched to
    pub agent_id: Option<String>,
    /// Model hint forwarded into telemetry
    pub model: Option<String>,
    /// Provider hint forwarded into telemetry
    pub provider: Option<String>,
    /// Unix timestamp
    pub created_at: i64,
    /// Unix timestamp
    pub updated_at: i64,
}

impl Prompt {
    /// Create a new prompt
    pub fn new(id: String, project_id: String, text: String, status: PromptStatus) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id,
            project_id,
            text,
            status: status.as_str().to_string(),
            agent_id: None,
            model: None,
            provider: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Get the status as enum
    pub fn status_enum(&self) -> PromptStatus {
        PromptStatus::from(self.status.as_str())
    }
}

/// Durable record of one dispatch's lifetime
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    /// Unique identifier for the session
    pub id: String,
    /// Owning project
    pub project_id: String,
    /// Agent the prompt was dispatched to
    pub agent_id: String,
    /// Prompt this session runs
    pub prompt_id: Option<String>,
    /// Unix timestamp (milliseconds)
    pub started_at: i64,
    /// Unix timestamp (milliseconds), unset while active
    pub ended_at: Option<i64>,
}

impl Session {
    /// Whether the session is still running
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Get started_at as DateTime
    pub fn started_at_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.started_at).unwrap_or_else(Utc::now)
    }
}

/// Result of `SessionStore::end_session`
#[derive(Debug, Clone)]
pub enum SessionEnd {
    /// This call ended the session
    Ended(Session),
    /// The session had already ended; nothing changed
    AlreadyEnded(Session),
    /// No such session
    NotFound,
}

/// One audit line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Owning project
    pub project_id: String,
    /// What happened, e.g. "prompt.dispatched"
    pub action: String,
    /// Kind of entity touched
    pub entity_type: String,
    /// Entity id
    pub entity_id: String,
    /// Free-form JSON detail
    pub detail: serde_json::Value,
}
