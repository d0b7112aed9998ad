//! Agent Dispatch Backend Library
//!
//! Connection registry, dispatch coordinator and telemetry hub for a fleet of
//! remote agents. The main binary is in `src/main.rs`.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
/// Live agent connections and the shared application state
pub mod state;
pub mod store;
pub mod telemetry;
pub mod websocket;
