//! Fleet telemetry
//!
//! An ephemeral, non-authoritative view of connected agents and running
//! executions, pushed to observers in per-project batches. Durable truth lives
//! in the prompt and session stores.

pub mod events;
pub mod hub;
pub mod scheduler;

pub use events::{AgentTelemetry, BroadcastEvent, ExecutionTelemetry, Snapshot, TokenUsage};
pub use hub::{ObserverId, ObserverSink, TelemetryHub};
pub use scheduler::{FlushTimer, IntervalFlushTimer, ManualFlushTimer};
