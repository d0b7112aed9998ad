//! Outbound half of an agent socket
//!
//! The socket task owns the websocket; everything else talks to the agent
//! through an `AgentChannel`, which only queues frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Close reason used when a newer connection takes over an agent identity
pub const REPLACED_REASON: &str = "replaced by new connection";

/// A frame queued for the agent socket writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// JSON text frame
    Text(String),
    /// Close the socket with the given reason
    Close(String),
}

/// Handle used to push frames to one connected agent
#[derive(Debug)]
pub struct AgentChannel {
    id: String,
    tx: mpsc::UnboundedSender<OutboundFrame>,
    closed: AtomicBool,
}

impl AgentChannel {
    /// Create a channel and the receiver the socket writer drains
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            tx,
            closed: AtomicBool::new(false),
        });
        (channel, rx)
    }

    /// Unique id of this connection (not the agent id)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True until `close` is called or the socket writer goes away
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queue a text frame. Returns false if the channel is not open.
    pub fn send_text(&self, text: String) -> bool {
        if !self.is_open() {
            return false;
        }
        self.tx.send(OutboundFrame::Text(text)).is_ok()
    }

    /// Mark the channel closed and ask the writer to close the socket.
    /// Only the first call queues a close frame.
    pub fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(OutboundFrame::Close(reason.to_string()));
    }
}
