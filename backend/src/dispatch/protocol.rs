//! Agent wire protocol
//!
//! JSON frames exchanged over an agent socket, tagged by `type`.

use crate::state::AgentStatus;
use crate::telemetry::TokenUsage;
use serde::{Deserialize, Serialize};

/// Server -> agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    /// Run a prompt inside a session
    ExecutePrompt {
        /// Prompt being run
        prompt_id: String,
        /// Session to report completion against
        session_id: String,
        /// Prompt text
        text: String,
    },
    /// Reply to an application-level ping
    Pong,
}

/// Agent -> server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentReport {
    /// Agent changed its own status
    Status {
        /// New status
        status: AgentStatus,
    },
    /// Agent finished the job for a session
    ExecutionComplete {
        /// Session from the `execute_prompt` frame
        session_id: String,
        /// Token usage, if the agent tracks it
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
    /// Application-level keepalive
    Ping,
}
