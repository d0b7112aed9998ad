//! WebSocket handlers
//!
//! Two socket kinds share the server: agents connect to `/ws/agent` to receive
//! work, observers connect to `/ws/telemetry` to watch fleet state.

pub mod agent;
pub mod observer;

pub use agent::agent_socket_handler;
pub use observer::telemetry_socket_handler;
