//! Prompt dispatch
//!
//! The coordinator runs the dispatch state machine on top of the connection
//! registry, the durable stores and the telemetry hub.

pub mod coordinator;
pub mod error;
pub mod protocol;

pub use coordinator::{DispatchOutcome, ExecutionCoordinator};
pub use error::DispatchError;
pub use protocol::{AgentCommand, AgentReport};
