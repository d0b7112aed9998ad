//! Execution coordinator
//!
//! Runs `dispatch` and the surrounding agent lifecycle. It is the only place
//! that keeps the registry, the durable stores and the telemetry hub in step.

use super::error::DispatchError;
use super::protocol::AgentCommand;
use crate::error::AppError;
use crate::state::{AgentChannel, AgentConnection, AgentStatus, ConnectionRegistry, ReserveError};
use crate::store::{
    ActivityEntry, ActivityLog, PromptStatus, PromptStore, SessionEnd, SessionStore,
};
use crate::telemetry::{ExecutionTelemetry, TelemetryHub, TokenUsage};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of a successful dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    /// Durable session created for the dispatch
    pub session_id: String,
    /// Telemetry execution minted for the dispatch
    pub execution_id: String,
}

/// Dispatch state machine
pub struct ExecutionCoordinator {
    registry: Arc<ConnectionRegistry>,
    hub: Arc<TelemetryHub>,
    prompts: Arc<dyn PromptStore>,
    sessions: Arc<dyn SessionStore>,
    activity: Arc<dyn ActivityLog>,
}

impl ExecutionCoordinator {
    /// Create a coordinator over the given services
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        hub: Arc<TelemetryHub>,
        prompts: Arc<dyn PromptStore>,
        sessions: Arc<dyn SessionStore>,
        activity: Arc<dyn ActivityLog>,
    ) -> Self {
        Self {
            registry,
            hub,
            prompts,
            sessions,
            activity,
        }
    }

    /// The connection registry
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The telemetry hub
    pub fn hub(&self) -> &Arc<TelemetryHub> {
        &self.hub
    }

    /// Send a ready prompt to an idle agent of the same project.
    ///
    /// Preconditions are checked in order and the first failure is returned
    /// without mutating anything. The idle -> busy flip is the first side
    /// effect and happens synchronously, so concurrent dispatches to one agent
    /// cannot both pass the idle check. The prompt's ready -> sent flip is a
    /// conditional update made before anything else is awaited, so concurrent
    /// dispatches of one prompt cannot both pass the ready check either.
    pub async fn dispatch(
        &self,
        prompt_id: &str,
        agent_id: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        let prompt = self
            .prompts
            .get_prompt(prompt_id)
            .await?
            .ok_or_else(|| DispatchError::PromptNotFound(prompt_id.to_string()))?;

        let status = prompt.status_enum();
        if status != PromptStatus::Ready {
            return Err(DispatchError::PromptNotReady {
                prompt_id: prompt_id.to_string(),
                status,
            });
        }

        let reserved = self
            .registry
            .try_reserve(agent_id, &prompt.project_id)
            .map_err(|e| match e {
                ReserveError::NotConnected => DispatchError::AgentNotConnected(agent_id.to_string()),
                ReserveError::ProjectMismatch { agent_project } => DispatchError::CrossProject {
                    agent_id: agent_id.to_string(),
                    agent_project,
                    prompt_project: prompt.project_id.clone(),
                },
                ReserveError::NotIdle(status) => DispatchError::AgentBusy {
                    agent_id: agent_id.to_string(),
                    status,
                },
            })?;

        match self.prompts.claim(prompt_id, agent_id).await {
            Ok(true) => {}
            Ok(false) => {
                self.release(&reserved);
                let status = match self.prompts.get_prompt(prompt_id).await {
                    Ok(Some(current)) => current.status_enum(),
                    _ => PromptStatus::Sent,
                };
                debug!(prompt_id = %prompt_id, agent_id = %agent_id, "Lost prompt claim to a concurrent dispatch");
                return Err(DispatchError::PromptNotReady {
                    prompt_id: prompt_id.to_string(),
                    status,
                });
            }
            Err(e) => {
                self.release(&reserved);
                return Err(e.into());
            }
        }
        self.hub.agent_status(agent_id, AgentStatus::Busy);

        let session = match self
            .sessions
            .create_session(&prompt.project_id, agent_id, prompt_id)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                self.roll_back(&reserved, prompt_id).await;
                return Err(e.into());
            }
        };

        // Send on the reserved connection, not whatever is registered now: a
        // replacement socket was never reserved.
        let command = AgentCommand::ExecutePrompt {
            prompt_id: prompt_id.to_string(),
            session_id: session.id.clone(),
            text: prompt.text.clone(),
        };
        let delivered = match serde_json::to_string(&command) {
            Ok(text) => reserved.channel.send_text(text),
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Failed to encode execute_prompt");
                false
            }
        };
        if !delivered {
            warn!(
                agent_id = %agent_id,
                prompt_id = %prompt_id,
                session_id = %session.id,
                "Agent channel closed before dispatch; session left for reconciliation"
            );
            self.roll_back(&reserved, prompt_id).await;
            return Err(DispatchError::SendFailed(agent_id.to_string()));
        }

        // The agent has the job now; nothing below may fail the dispatch.
        let execution_id = Uuid::new_v4().to_string();
        self.hub.execution_started(ExecutionTelemetry {
            execution_id: execution_id.clone(),
            agent_id: agent_id.to_string(),
            project_id: prompt.project_id.clone(),
            prompt_id: prompt_id.to_string(),
            session_id: session.id.clone(),
            model: prompt.model.clone(),
            provider: prompt.provider.clone(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            usage: None,
        });

        info!(
            prompt_id = %prompt_id,
            agent_id = %agent_id,
            session_id = %session.id,
            execution_id = %execution_id,
            "Prompt dispatched"
        );

        self.record_activity(ActivityEntry {
            project_id: prompt.project_id,
            action: "prompt.dispatched".to_string(),
            entity_type: "prompt".to_string(),
            entity_id: prompt_id.to_string(),
            detail: json!({
                "agent_id": agent_id,
                "session_id": session.id,
                "execution_id": execution_id,
            }),
        })
        .await;

        Ok(DispatchOutcome {
            session_id: session.id,
            execution_id,
        })
    }

    fn release(&self, reserved: &AgentConnection) {
        if self
            .registry
            .release(&reserved.agent_id, reserved.channel.id())
        {
            self.hub.agent_status(&reserved.agent_id, AgentStatus::Idle);
        }
    }

    /// Undo a claimed, reserved dispatch: prompt back to ready, agent back to idle
    async fn roll_back(&self, reserved: &AgentConnection, prompt_id: &str) {
        match self.prompts.unclaim(prompt_id).await {
            Ok(true) => {}
            Ok(false) => warn!(prompt_id = %prompt_id, "Prompt left sent state during rollback"),
            Err(e) => warn!(prompt_id = %prompt_id, error = %e, "Failed to return prompt to ready"),
        }
        self.release(reserved);
    }

    async fn record_activity(&self, entry: ActivityEntry) {
        if let Err(e) = self.activity.record(&entry).await {
            warn!(
                action = %entry.action,
                entity_id = %entry.entity_id,
                error = %e,
                "Failed to write activity log"
            );
        }
    }

    /// Register a freshly handshaken agent and announce it
    pub fn connect_agent(
        &self,
        agent_id: &str,
        project_id: &str,
        channel: Arc<AgentChannel>,
    ) -> AgentConnection {
        let (entry, replaced) = self.registry.register(agent_id, project_id, channel);
        if let Some(previous) = replaced.as_ref().filter(|p| p.project_id != entry.project_id) {
            // The old project loses this agent and whatever it was running
            let purged = self.hub.agent_disconnected(agent_id, &previous.project_id);
            info!(
                agent_id = %agent_id,
                old_project = %previous.project_id,
                new_project = %project_id,
                purged_executions = purged,
                "Agent moved to another project"
            );
        }
        self.hub.agent_connected(&entry);
        info!(
            agent_id = %agent_id,
            project_id = %project_id,
            connection = %entry.channel.id(),
            replaced = replaced.is_some(),
            "Agent connected"
        );
        entry
    }

    /// Handle a closed agent socket.
    ///
    /// Only acts if `channel_id` is still the agent's current connection. The
    /// agent's executions are purged from telemetry; the sessions and prompts
    /// behind them are left for durable reconciliation.
    pub fn disconnect_agent(&self, channel_id: &str) -> Option<AgentConnection> {
        let removed = self.registry.remove_by_channel(channel_id)?;
        let purged = self
            .hub
            .agent_disconnected(&removed.agent_id, &removed.project_id);
        info!(
            agent_id = %removed.agent_id,
            project_id = %removed.project_id,
            purged_executions = purged,
            "Agent disconnected"
        );
        Some(removed)
    }

    /// Apply a status reported by the agent over `channel_id`.
    /// Reports from a replaced connection are ignored.
    pub fn report_status(&self, agent_id: &str, channel_id: &str, status: AgentStatus) -> bool {
        let is_current = self
            .registry
            .get(agent_id)
            .is_some_and(|c| c.channel.id() == channel_id);
        if !is_current {
            debug!(agent_id = %agent_id, "Ignoring status from stale connection");
            return false;
        }
        if self.registry.set_status(agent_id, status) {
            self.hub.agent_status(agent_id, status);
            true
        } else {
            false
        }
    }

    /// Close out a session the agent reports as finished.
    ///
    /// Only the agent that owns the session may complete it, and only once.
    /// Ends the session, moves its prompt from sent to done, completes the
    /// matching execution (if telemetry still has it) and returns the agent
    /// to idle. Returns the finished execution, if any.
    pub async fn complete_session(
        &self,
        agent_id: &str,
        session_id: &str,
        usage: Option<TokenUsage>,
    ) -> Result<Option<ExecutionTelemetry>, AppError> {
        let owner = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {}", session_id)))?;
        if owner.agent_id != agent_id {
            return Err(AppError::Forbidden(format!(
                "session {} does not belong to agent {}",
                session_id, agent_id
            )));
        }

        let session = match self.sessions.end_session(session_id).await? {
            SessionEnd::Ended(session) => session,
            SessionEnd::AlreadyEnded(_) => {
                return Err(AppError::InvalidState(format!(
                    "session {} already ended",
                    session_id
                )));
            }
            SessionEnd::NotFound => {
                return Err(AppError::NotFound(format!("session {}", session_id)));
            }
        };

        if let Some(prompt_id) = session.prompt_id.as_deref() {
            let prompt = self.prompts.get_prompt(prompt_id).await?;
            if prompt.is_some_and(|p| p.status_enum() == PromptStatus::Sent) {
                self.prompts
                    .update_status(prompt_id, PromptStatus::Done)
                    .await?;
            }
        }

        let finished = self
            .hub
            .find_execution_by_session(session_id)
            .and_then(|e| self.hub.track_execution_completed(&e.execution_id, usage));

        if self.registry.get(&session.agent_id).map(|c| c.status) == Some(AgentStatus::Busy)
            && self.registry.set_status(&session.agent_id, AgentStatus::Idle)
        {
            self.hub.agent_status(&session.agent_id, AgentStatus::Idle);
        }

        info!(
            session_id = %session_id,
            agent_id = %session.agent_id,
            session_ms = (Utc::now() - session.started_at_datetime()).num_milliseconds(),
            tokens = usage.map(|u| u.total()),
            tracked = finished.is_some(),
            "Session completed"
        );

        self.record_activity(ActivityEntry {
            project_id: session.project_id.clone(),
            action: "session.completed".to_string(),
            entity_type: "session".to_string(),
            entity_id: session_id.to_string(),
            detail: json!({
                "agent_id": session.agent_id,
                "prompt_id": session.prompt_id,
                "usage": usage,
            }),
        })
        .await;

        Ok(finished)
    }
}
