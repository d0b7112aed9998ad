//! State management module
//! Handles the live agent registry and the shared application state

pub mod app_state;
pub mod channel;
pub mod registry;

pub use app_state::AppState;
pub use channel::{AgentChannel, OutboundFrame, REPLACED_REASON};
pub use registry::{
    AgentConnection, AgentId, AgentStatus, ConnectionRegistry, ProjectId, ReserveError,
};
