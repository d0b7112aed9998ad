//! Dispatch-specific error types
//!
//! Every way a dispatch can be refused or fail, returned as data so callers
//! can map it onto their own status codes.

use crate::error::AppError;
use crate::state::AgentStatus;
use crate::store::PromptStatus;
use thiserror::Error;

/// Errors that can occur while dispatching a prompt
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No prompt with this id
    #[error("prompt {0} not found")]
    PromptNotFound(String),

    /// Prompt is not in the ready state
    #[error("prompt {prompt_id} is {status}, expected ready")]
    PromptNotReady {
        /// The prompt
        prompt_id: String,
        /// Its current status
        status: PromptStatus,
    },

    /// Agent is not registered or its channel is closed
    #[error("agent {0} not connected")]
    AgentNotConnected(String),

    /// Agent and prompt belong to different projects
    #[error("agent {agent_id} belongs to project {agent_project}, prompt belongs to {prompt_project}")]
    CrossProject {
        /// The agent
        agent_id: String,
        /// The agent's project
        agent_project: String,
        /// The prompt's project
        prompt_project: String,
    },

    /// Agent is connected but not idle
    #[error("agent {agent_id} busy ({status})")]
    AgentBusy {
        /// The agent
        agent_id: String,
        /// Its current status
        status: AgentStatus,
    },

    /// The channel closed between the checks and the send
    #[error("failed to deliver prompt to agent {0}")]
    SendFailed(String),

    /// A store call failed
    #[error(transparent)]
    Store(#[from] AppError),
}
