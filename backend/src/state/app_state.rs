//! Application state
//! Wires the registry, telemetry hub, stores and coordinator together

use crate::config::Config;
use crate::dispatch::ExecutionCoordinator;
use crate::state::ConnectionRegistry;
use crate::store::SqliteStore;
use crate::telemetry::{FlushTimer, TelemetryHub};
use std::sync::Arc;

/// Shared state handed to every handler
///
/// Cheap to clone: every field is reference counted.
#[derive(Clone)]
pub struct AppState {
    /// Live agent connections
    pub registry: Arc<ConnectionRegistry>,
    /// Telemetry fan-out
    pub hub: Arc<TelemetryHub>,
    /// Dispatch state machine
    pub coordinator: Arc<ExecutionCoordinator>,
    /// Durable store behind prompts, sessions and the activity log
    pub store: Arc<SqliteStore>,
    /// Runtime configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Build the state graph around an opened store and a flush timer
    pub fn new(config: Config, store: Arc<SqliteStore>, timer: Arc<dyn FlushTimer>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = TelemetryHub::new(timer);
        let coordinator = Arc::new(ExecutionCoordinator::new(
            registry.clone(),
            hub.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
        ));

        Self {
            registry,
            hub,
            coordinator,
            store,
            config: Arc::new(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AgentChannel, AgentStatus};
    use crate::telemetry::ManualFlushTimer;
    use tempfile::TempDir;

    async fn create_test_state() -> (AppState, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let store = SqliteStore::new(db_path.to_str().unwrap()).await.unwrap();
        let state = AppState::new(
            Config::default(),
            Arc::new(store),
            Arc::new(ManualFlushTimer::new()),
        );
        (state, temp_dir)
    }

    #[tokio::test]
    async fn test_app_state_creation() {
        let (state, _temp_dir) = create_test_state().await;
        assert!(state.registry.is_empty());
        assert_eq!(state.hub.observer_count(), 0);
        assert_eq!(state.config.server.port, 8080);
    }

    #[tokio::test]
    async fn test_components_share_registry_and_hub() {
        let (state, _temp_dir) = create_test_state().await;
        let (channel, _rx) = AgentChannel::new();
        state.coordinator.connect_agent("a1", "p1", channel);

        let conn = state.registry.get("a1").unwrap();
        assert_eq!(conn.status, AgentStatus::Idle);
        assert_eq!(state.hub.snapshot(Some("p1")).agents.len(), 1);

        let cloned = state.clone();
        assert!(Arc::ptr_eq(&cloned.registry, &state.registry));
        assert!(Arc::ptr_eq(&cloned.hub, state.coordinator.hub()));
    }
}
