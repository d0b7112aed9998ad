//! Telemetry records and the broadcast event sum type

use crate::state::{AgentConnection, AgentId, AgentStatus, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token counts reported by an agent when a job finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    #[serde(default)]
    pub input_tokens: u64,
    /// Completion tokens
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Sum of input and output tokens
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// In-memory view of one connected agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTelemetry {
    /// Agent identity
    pub agent_id: AgentId,
    /// Owning project
    pub project_id: ProjectId,
    /// Last known status
    pub status: AgentStatus,
    /// When the handshake completed
    pub connected_at: DateTime<Utc>,
}

impl From<&AgentConnection> for AgentTelemetry {
    fn from(conn: &AgentConnection) -> Self {
        Self {
            agent_id: conn.agent_id.clone(),
            project_id: conn.project_id.clone(),
            status: conn.status,
            connected_at: conn.connected_at,
        }
    }
}

/// In-memory projection of one dispatched prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTelemetry {
    /// Minted at dispatch time
    pub execution_id: String,
    /// Agent running the prompt
    pub agent_id: AgentId,
    /// Owning project
    pub project_id: ProjectId,
    /// Dispatched prompt
    pub prompt_id: String,
    /// Durable session created for the dispatch
    pub session_id: String,
    /// Model hint, if the prompt carried one
    pub model: Option<String>,
    /// Provider hint, if the prompt carried one
    pub provider: Option<String>,
    /// Dispatch time
    pub started_at: DateTime<Utc>,
    /// Completion time
    pub ended_at: Option<DateTime<Utc>>,
    /// Wall time between start and end
    pub duration_ms: Option<i64>,
    /// Token usage reported on completion
    pub usage: Option<TokenUsage>,
}

impl ExecutionTelemetry {
    /// Stamp the end time, duration and usage
    pub fn finish(&mut self, usage: Option<TokenUsage>) {
        let ended_at = Utc::now();
        self.duration_ms = Some((ended_at - self.started_at).num_milliseconds().max(0));
        self.ended_at = Some(ended_at);
        self.usage = usage;
    }
}

/// Full state sent to a new observer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Connected agents
    pub agents: Vec<AgentTelemetry>,
    /// Active executions
    pub executions: Vec<ExecutionTelemetry>,
    /// Executions completed since startup
    pub completed_count: u64,
}

/// Everything the hub can tell an observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastEvent {
    /// An agent finished its handshake
    AgentConnected {
        /// Owning project
        project_id: ProjectId,
        /// The agent
        agent: AgentTelemetry,
    },
    /// An agent's socket went away
    AgentDisconnected {
        /// Owning project
        project_id: ProjectId,
        /// The agent
        agent_id: AgentId,
    },
    /// An agent's status changed
    AgentStatus {
        /// Owning project
        project_id: ProjectId,
        /// The agent
        agent_id: AgentId,
        /// New status
        status: AgentStatus,
    },
    /// A prompt was dispatched
    ExecutionStarted {
        /// Owning project
        project_id: ProjectId,
        /// The new execution
        execution: ExecutionTelemetry,
    },
    /// A dispatched prompt finished
    ExecutionCompleted {
        /// Owning project
        project_id: ProjectId,
        /// The finished execution, with end time and usage
        execution: ExecutionTelemetry,
    },
    /// Full state, sent once on subscribe
    Snapshot(Snapshot),
}

impl BroadcastEvent {
    /// Project the event is scoped to; `None` for snapshots
    pub fn project_id(&self) -> Option<&str> {
        match self {
            BroadcastEvent::AgentConnected { project_id, .. }
            | BroadcastEvent::AgentDisconnected { project_id, .. }
            | BroadcastEvent::AgentStatus { project_id, .. }
            | BroadcastEvent::ExecutionStarted { project_id, .. }
            | BroadcastEvent::ExecutionCompleted { project_id, .. } => Some(project_id),
            BroadcastEvent::Snapshot(_) => None,
        }
    }
}

/// Encode one flush worth of events for a project: the bare event when there
/// is exactly one, a `{"type":"batch","events":[..]}` envelope otherwise.
pub fn encode_flush(events: &[BroadcastEvent]) -> serde_json::Result<String> {
    match events {
        [single] => serde_json::to_string(single),
        _ => serde_json::to_string(&serde_json::json!({
            "type": "batch",
            "events": events,
        })),
    }
}
