//! Connection registry
//!
//! One live channel per agent identity. Every operation is total: absence and
//! closed channels come back as `None`/`false`, never as errors.

use super::channel::{AgentChannel, REPLACED_REASON};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Unique identifier for an agent
pub type AgentId = String;

/// Unique identifier for a project (tenant)
pub type ProjectId = String;

/// Agent status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Connected and free to take a prompt
    Idle,
    /// Working on a prompt
    Busy,
    /// Reported itself unavailable
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// A registered agent connection
#[derive(Debug, Clone)]
pub struct AgentConnection {
    /// Agent identity
    pub agent_id: AgentId,
    /// Owning project
    pub project_id: ProjectId,
    /// Outbound channel
    pub channel: Arc<AgentChannel>,
    /// Current status
    pub status: AgentStatus,
    /// When the handshake completed
    pub connected_at: DateTime<Utc>,
}

/// Why `try_reserve` refused an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveError {
    /// Not registered, or its channel is closed
    NotConnected,
    /// Agent belongs to another project
    ProjectMismatch {
        /// The agent's project
        agent_project: ProjectId,
    },
    /// Agent is not idle
    NotIdle(AgentStatus),
}

/// Registry of live agent connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<AgentId, AgentConnection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a connection for `agent_id`, starting idle.
    ///
    /// An existing connection for the same identity is closed with
    /// [`REPLACED_REASON`] first. Returns the new entry and the one it
    /// replaced, if any.
    pub fn register(
        &self,
        agent_id: &str,
        project_id: &str,
        channel: Arc<AgentChannel>,
    ) -> (AgentConnection, Option<AgentConnection>) {
        let entry = AgentConnection {
            agent_id: agent_id.to_string(),
            project_id: project_id.to_string(),
            channel,
            status: AgentStatus::Idle,
            connected_at: Utc::now(),
        };

        let mut conns = self.connections.write();
        let replaced = conns.remove(agent_id);
        if let Some(previous) = &replaced {
            previous.channel.close(REPLACED_REASON);
            info!(
                agent_id = %agent_id,
                old_connection = %previous.channel.id(),
                old_project = %previous.project_id,
                new_connection = %entry.channel.id(),
                "Replaced existing agent connection"
            );
        }
        conns.insert(agent_id.to_string(), entry.clone());
        (entry, replaced)
    }

    /// Remove an agent by identity
    pub fn remove(&self, agent_id: &str) -> Option<AgentConnection> {
        self.connections.write().remove(agent_id)
    }

    /// Remove whichever agent currently owns `channel_id`.
    ///
    /// A channel that was already replaced owns nothing, so a late disconnect
    /// from a stale socket leaves the newer connection alone.
    pub fn remove_by_channel(&self, channel_id: &str) -> Option<AgentConnection> {
        let mut conns = self.connections.write();
        let agent_id = conns
            .values()
            .find(|c| c.channel.id() == channel_id)
            .map(|c| c.agent_id.clone())?;
        conns.remove(&agent_id)
    }

    /// Look up an agent
    pub fn get(&self, agent_id: &str) -> Option<AgentConnection> {
        self.connections.read().get(agent_id).cloned()
    }

    /// Update an agent's status in place. Returns false if the agent is absent.
    pub fn set_status(&self, agent_id: &str, status: AgentStatus) -> bool {
        match self.connections.write().get_mut(agent_id) {
            Some(conn) => {
                conn.status = status;
                true
            }
            None => false,
        }
    }

    /// All agents connected for a project
    pub fn list_by_project(&self, project_id: &str) -> Vec<AgentConnection> {
        let mut agents: Vec<AgentConnection> = self
            .connections
            .read()
            .values()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// Number of registered agents
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// True if no agent is registered
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Serialize `message` and queue it for the agent.
    ///
    /// Returns false if the agent is absent, its channel is not open, or the
    /// message cannot be encoded.
    pub fn send<T: Serialize>(&self, agent_id: &str, message: &T) -> bool {
        let channel = match self.connections.read().get(agent_id) {
            Some(conn) => Arc::clone(&conn.channel),
            None => return false,
        };
        match serde_json::to_string(message) {
            Ok(text) => channel.send_text(text),
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Failed to encode agent message");
                false
            }
        }
    }

    /// Atomically check that an agent can take work for `project_id` and flip
    /// it from idle to busy.
    ///
    /// Checks run in dispatch order: connected, same project, idle. The
    /// transition happens under the write lock, so two callers can never both
    /// reserve the same agent.
    pub fn try_reserve(
        &self,
        agent_id: &str,
        project_id: &str,
    ) -> Result<AgentConnection, ReserveError> {
        let mut conns = self.connections.write();
        let conn = match conns.get_mut(agent_id) {
            Some(conn) if conn.channel.is_open() => conn,
            _ => return Err(ReserveError::NotConnected),
        };
        if conn.project_id != project_id {
            return Err(ReserveError::ProjectMismatch {
                agent_project: conn.project_id.clone(),
            });
        }
        if conn.status != AgentStatus::Idle {
            return Err(ReserveError::NotIdle(conn.status));
        }
        conn.status = AgentStatus::Busy;
        Ok(conn.clone())
    }

    /// Undo a reservation: busy -> idle, but only while `channel_id` is still
    /// the agent's current connection.
    pub fn release(&self, agent_id: &str, channel_id: &str) -> bool {
        match self.connections.write().get_mut(agent_id) {
            Some(conn) if conn.channel.id() == channel_id && conn.status == AgentStatus::Busy => {
                conn.status = AgentStatus::Idle;
                true
            }
            _ => false,
        }
    }
}
