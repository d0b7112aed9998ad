//! Agent socket
//!
//! The socket is split into a writer task that drains the agent's
//! `AgentChannel` (plus periodic pings) and a reader task that applies the
//! agent's reports. Whichever finishes first ends the connection, and the
//! close always runs the coordinator's disconnect path.

use crate::dispatch::{AgentCommand, AgentReport, ExecutionCoordinator};
use crate::error::AppError;
use crate::state::{AgentChannel, AppState, OutboundFrame};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Close reason sent when an agent stops talking
pub const IDLE_TIMEOUT_REASON: &str = "idle timeout";

/// Close reason echoed when the agent ends the connection itself
const CLIENT_CLOSED_REASON: &str = "connection closed";

/// How long the writer gets to flush a close frame after the reader stops
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Query string of the agent handshake
#[derive(Debug, Default, Deserialize)]
pub struct AgentHandshake {
    /// Agent identity
    pub agent_id: Option<String>,
    /// Project the agent works for
    pub project_id: Option<String>,
}

impl AgentHandshake {
    /// Both identifiers, trimmed and non-empty
    pub fn validate(self) -> Result<(String, String), AppError> {
        let agent_id = non_empty(self.agent_id)
            .ok_or_else(|| AppError::InvalidRequest("agent_id is required".to_string()))?;
        let project_id = non_empty(self.project_id)
            .ok_or_else(|| AppError::InvalidRequest("project_id is required".to_string()))?;
        Ok((agent_id, project_id))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// WebSocket upgrade handler for agents
///
/// # Arguments
/// * `state` - Application state
/// * `params` - `agent_id` and `project_id` query parameters
/// * `ws` - WebSocket upgrade request
///
/// # Returns
/// * `Ok(Response)` - Upgrade response
/// * `Err(AppError::InvalidRequest)` - A handshake parameter is missing
pub async fn agent_socket_handler(
    State(state): State<AppState>,
    Query(params): Query<AgentHandshake>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let (agent_id, project_id) = params.validate()?;
    Ok(ws.on_upgrade(move |socket| handle_agent_socket(socket, state, agent_id, project_id)))
}

async fn handle_agent_socket(
    socket: WebSocket,
    state: AppState,
    agent_id: String,
    project_id: String,
) {
    let (mut sender, mut receiver) = socket.split();
    let (channel, mut outbound) = AgentChannel::new();
    let channel_id = channel.id().to_string();
    let coordinator = state.coordinator.clone();
    coordinator.connect_agent(&agent_id, &project_id, channel.clone());

    // Writer: queued frames and server pings
    let ping_period = Duration::from_secs(state.config.agents.ping_interval_secs.max(1));
    let writer_agent = agent_id.clone();
    let mut send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_period);
        ping.tick().await;
        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    match frame {
                        OutboundFrame::Text(text) => {
                            if let Err(e) = sender.send(Message::Text(text)).await {
                                warn!(agent_id = %writer_agent, error = %e, "Failed to write to agent socket");
                                break;
                            }
                        }
                        OutboundFrame::Close(reason) => {
                            let _ = sender
                                .send(Message::Close(Some(CloseFrame {
                                    code: close_code::NORMAL,
                                    reason: reason.into(),
                                })))
                                .await;
                            break;
                        }
                    }
                }
                _ = ping.tick() => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader: agent reports, bounded by the idle timeout
    let idle_timeout = state.config.agent_idle_timeout();
    let reader_agent = agent_id.clone();
    let reader_channel = channel.clone();
    let reader_coordinator = coordinator.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, receiver.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(agent_id = %reader_agent, "Agent idle timeout, closing socket");
                        reader_channel.close(IDLE_TIMEOUT_REASON);
                        break;
                    }
                },
                None => receiver.next().await,
            };

            match next {
                Some(Ok(Message::Text(text))) => {
                    handle_report(&reader_coordinator, &reader_agent, &reader_channel, &text).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(agent_id = %reader_agent, "Agent closed socket");
                    break;
                }
                Some(Ok(_)) => {
                    // Pings, pongs and binary frames only count as liveness
                }
                Some(Err(e)) => {
                    warn!(agent_id = %reader_agent, error = %e, "Agent socket error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            // No-op if the reader already closed the channel (idle timeout)
            channel.close(CLIENT_CLOSED_REASON);
            let _ = tokio::time::timeout(CLOSE_GRACE, &mut send_task).await;
            send_task.abort();
        }
    }

    if coordinator.disconnect_agent(&channel_id).is_none() {
        debug!(agent_id = %agent_id, "Replaced agent connection closed");
    }
    info!(agent_id = %agent_id, project_id = %project_id, "Agent socket closed");
}

/// Apply one text frame from an agent
pub async fn handle_report(
    coordinator: &ExecutionCoordinator,
    agent_id: &str,
    channel: &Arc<AgentChannel>,
    text: &str,
) {
    let report = match serde_json::from_str::<AgentReport>(text) {
        Ok(report) => report,
        Err(e) => {
            warn!(agent_id = %agent_id, error = %e, "Unrecognised agent frame");
            return;
        }
    };

    match report {
        AgentReport::Status { status } => {
            coordinator.report_status(agent_id, channel.id(), status);
        }
        AgentReport::ExecutionComplete { session_id, usage } => {
            if let Err(e) = coordinator
                .complete_session(agent_id, &session_id, usage)
                .await {
                warn!(
                    agent_id = %agent_id,
                    session_id = %session_id,
                    error = %e,
                    "Failed to complete session"
                );
            }
        }
        AgentReport::Ping => match serde_json::to_string(&AgentCommand::Pong) {
            Ok(pong) => {
                let _ = channel.send_text(pong);
            }
            Err(e) => warn!(error = %e, "Failed to encode pong"),
        },
    }
}
