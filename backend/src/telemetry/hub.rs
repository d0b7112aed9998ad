//! Project-scoped, batched fan-out of fleet state
//!
//! Mutations update the in-memory maps first and then queue an event for the
//! owning project. A flush drains every project's queue and delivers one
//! message per project (the bare event, or a batch envelope) to observers
//! subscribed to exactly that project. Observers subscribed without a project
//! only ever get their initial snapshot.

use super::events::{
    encode_flush, AgentTelemetry, BroadcastEvent, ExecutionTelemetry, Snapshot, TokenUsage,
};
use super::scheduler::FlushTimer;
use crate::state::{AgentConnection, AgentId, AgentStatus, ProjectId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Identifies one subscription
pub type ObserverId = u64;

/// Outbound queue of one observer
pub type ObserverSink = mpsc::Sender<Arc<String>>;

struct Observer {
    project_id: Option<ProjectId>,
    sink: ObserverSink,
}

#[derive(Default)]
struct HubState {
    agents: HashMap<AgentId, AgentTelemetry>,
    executions: HashMap<String, ExecutionTelemetry>,
    completed: HashMap<ProjectId, u64>,
    completed_total: u64,
    pending: HashMap<ProjectId, Vec<BroadcastEvent>>,
    observers: HashMap<ObserverId, Observer>,
    next_observer_id: ObserverId,
    timer_running: bool,
}

impl HubState {
    fn snapshot(&self, project_id: Option<&str>) -> Snapshot {
        let in_scope = |p: &str| project_id.map_or(true, |wanted| wanted == p);

        let mut agents: Vec<AgentTelemetry> = self
            .agents
            .values()
            .filter(|a| in_scope(&a.project_id))
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

        let mut executions: Vec<ExecutionTelemetry> = self
            .executions
            .values()
            .filter(|e| in_scope(&e.project_id))
            .cloned()
            .collect();
        executions.sort_by(|a, b| a.started_at.cmp(&b.started_at));

        let completed_count = match project_id {
            Some(p) => self.completed.get(p).copied().unwrap_or(0),
            None => self.completed_total,
        };

        Snapshot {
            agents,
            executions,
            completed_count,
        }
    }
}

/// In-memory telemetry hub
pub struct TelemetryHub {
    state: Mutex<HubState>,
    timer: Arc<dyn FlushTimer>,
    self_ref: Weak<TelemetryHub>,
}

impl TelemetryHub {
    /// Create a hub driven by `timer`
    pub fn new(timer: Arc<dyn FlushTimer>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            state: Mutex::new(HubState::default()),
            timer,
            self_ref: self_ref.clone(),
        })
    }

    fn enqueue(&self, state: &mut HubState, event: BroadcastEvent) {
        let Some(project_id) = event.project_id().map(str::to_string) else {
            return;
        };
        state.pending.entry(project_id).or_default().push(event);
        if !state.timer_running {
            state.timer_running = true;
            self.timer.start(self.self_ref.clone());
        }
    }

    /// Register an observer and synchronously send it a snapshot.
    ///
    /// With `project_id` set the observer also receives that project's
    /// batched events; without it, the snapshot is all it gets.
    pub fn subscribe(&self, sink: ObserverSink, project_id: Option<&str>) -> ObserverId {
        let mut state = self.state.lock();
        let snapshot = BroadcastEvent::Snapshot(state.snapshot(project_id));
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                if let Err(e) = sink.try_send(Arc::new(json)) {
                    warn!(error = %e, "Failed to deliver telemetry snapshot");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode telemetry snapshot"),
        }

        let id = state.next_observer_id;
        state.next_observer_id += 1;
        let _ = state.observers.insert(
            id,
            Observer {
                project_id: project_id.map(str::to_string),
                sink,
            },
        );
        debug!(observer_id = id, project_id = ?project_id, "Observer subscribed");
        id
    }

    /// Drop an observer. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.state.lock().observers.remove(&id).is_some()
    }

    /// Number of subscribed observers
    pub fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }

    /// Current state, filtered to one project or global
    pub fn snapshot(&self, project_id: Option<&str>) -> Snapshot {
        self.state.lock().snapshot(project_id)
    }

    /// Record a (re)connected agent
    pub fn agent_connected(&self, conn: &AgentConnection) {
        let agent = AgentTelemetry::from(conn);
        let mut state = self.state.lock();
        let _ = state.agents.insert(agent.agent_id.clone(), agent.clone());
        let event = BroadcastEvent::AgentConnected {
            project_id: agent.project_id.clone(),
            agent,
        };
        self.enqueue(&mut state, event);
    }

    /// Forget an agent and silently purge every execution it owned.
    /// Returns how many executions were purged.
    pub fn agent_disconnected(&self, agent_id: &str, project_id: &str) -> usize {
        let mut state = self.state.lock();
        let _ = state.agents.remove(agent_id);

        let before = state.executions.len();
        state.executions.retain(|_, e| e.agent_id != agent_id);
        let purged = before - state.executions.len();
        if purged > 0 {
            debug!(agent_id = %agent_id, purged, "Purged executions of disconnected agent");
        }

        let event = BroadcastEvent::AgentDisconnected {
            project_id: project_id.to_string(),
            agent_id: agent_id.to_string(),
        };
        self.enqueue(&mut state, event);
        purged
    }

    /// Record an agent status change. No-op for unknown agents.
    pub fn agent_status(&self, agent_id: &str, status: AgentStatus) {
        let mut state = self.state.lock();
        let Some(agent) = state.agents.get_mut(agent_id) else {
            return;
        };
        if agent.status == status {
            return;
        }
        agent.status = status;
        let event = BroadcastEvent::AgentStatus {
            project_id: agent.project_id.clone(),
            agent_id: agent_id.to_string(),
            status,
        };
        self.enqueue(&mut state, event);
    }

    /// Record a freshly dispatched execution
    pub fn execution_started(&self, execution: ExecutionTelemetry) {
        let mut state = self.state.lock();
        let _ = state
            .executions
            .insert(execution.execution_id.clone(), execution.clone());
        let event = BroadcastEvent::ExecutionStarted {
            project_id: execution.project_id.clone(),
            execution,
        };
        self.enqueue(&mut state, event);
    }

    /// Finish an active execution and bump the completed counter.
    ///
    /// Returns the finished record, or `None` (and changes nothing) if the
    /// execution is unknown, e.g. because its agent disconnected.
    pub fn track_execution_completed(
        &self,
        execution_id: &str,
        usage: Option<TokenUsage>,
    ) -> Option<ExecutionTelemetry> {
        let mut state = self.state.lock();
        let mut execution = state.executions.remove(execution_id)?;
        execution.finish(usage);

        *state
            .completed
            .entry(execution.project_id.clone())
            .or_default() += 1;
        state.completed_total += 1;

        let event = BroadcastEvent::ExecutionCompleted {
            project_id: execution.project_id.clone(),
            execution: execution.clone(),
        };
        self.enqueue(&mut state, event);
        Some(execution)
    }

    /// Active execution attached to a session
    pub fn find_execution_by_session(&self, session_id: &str) -> Option<ExecutionTelemetry> {
        self.state
            .lock()
            .executions
            .values()
            .find(|e| e.session_id == session_id)
            .cloned()
    }

    /// Number of active executions across all projects
    pub fn active_execution_count(&self) -> usize {
        self.state.lock().executions.len()
    }

    /// Completed executions, for one project or in total
    pub fn completed_count(&self, project_id: Option<&str>) -> u64 {
        let state = self.state.lock();
        match project_id {
            Some(p) => state.completed.get(p).copied().unwrap_or(0),
            None => state.completed_total,
        }
    }

    /// Deliver everything pending. Returns false, and stops the timer, when
    /// there was nothing to deliver.
    ///
    /// Delivery failures are per observer: a full queue skips that observer
    /// for this flush, a closed one is dropped. Nothing here can fail the
    /// flush as a whole.
    pub fn flush(&self) -> bool {
        let mut state = self.state.lock();
        if state.pending.is_empty() {
            if state.timer_running {
                state.timer_running = false;
                self.timer.stop();
            }
            return false;
        }

        let pending = std::mem::take(&mut state.pending);
        let mut dead = Vec::new();
        for (project_id, events) in pending {
            let json = match encode_flush(&events) {
                Ok(json) => Arc::new(json),
                Err(e) => {
                    warn!(project_id = %project_id, error = %e, "Failed to encode telemetry batch");
                    continue;
                }
            };

            let mut recipients = 0u32;
            for (id, observer) in &state.observers {
                if observer.project_id.as_deref() != Some(project_id.as_str()) {
                    continue;
                }
                match observer.sink.try_send(Arc::clone(&json)) {
                    Ok(()) => recipients += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(observer_id = id, project_id = %project_id, "Observer queue full, skipping flush");
                    }
                    Err(TrySendError::Closed(_)) => dead.push(*id),
                }
            }
            debug!(
                project_id = %project_id,
                events = events.len(),
                recipients,
                "Flushed telemetry"
            );
        }

        for id in dead {
            let _ = state.observers.remove(&id);
            debug!(observer_id = id, "Dropped closed observer");
        }
        true
    }

    /// Stop the flush timer; pending events stay queued
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.timer_running {
            state.timer_running = false;
            self.timer.stop();
        }
    }
}
