//! Observer socket
//!
//! Subscribes to the telemetry hub and forwards whatever it queues. The hub
//! sends the snapshot during `subscribe`, so it is always the first frame.

use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Query string of the observer handshake
#[derive(Debug, Default, Deserialize)]
pub struct ObserverParams {
    /// Project to follow; without it the observer only gets the snapshot
    pub project_id: Option<String>,
}

/// WebSocket upgrade handler for telemetry observers
pub async fn telemetry_socket_handler(
    State(state): State<AppState>,
    Query(params): Query<ObserverParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let project_id = params.project_id.filter(|p| !p.trim().is_empty());
    ws.on_upgrade(move |socket| handle_observer_socket(socket, state, project_id))
}

async fn handle_observer_socket(socket: WebSocket, state: AppState, project_id: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(state.config.telemetry.observer_buffer.max(1));
    let hub = state.hub.clone();
    let observer_id = hub.subscribe(tx, project_id.as_deref());
    info!(observer_id, project_id = ?project_id, "Observer connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = sender.send(Message::Text(text.as_ref().clone())).await {
                warn!(error = %e, "Failed to write to observer socket");
                break;
            }
        }
    });

    // Observers never send anything meaningful; read only to notice the close
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    if !hub.unsubscribe(observer_id) {
        debug!(observer_id, "Observer was already dropped by the hub");
    }
    info!(observer_id, "Observer disconnected");
}
