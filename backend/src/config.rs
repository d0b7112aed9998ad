//! Application configuration
//!
//! Centralized configuration management with environment variable support
//! and sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Persistence configuration
    pub persistence: PersistenceConfig,
    /// Telemetry hub configuration
    pub telemetry: TelemetryConfig,
    /// Agent connection configuration
    pub agents: AgentConnectionConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind the server to
    pub port: u16,
    /// Host address to bind to
    pub host: String,
}

/// Persistence configuration
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// SQLite file holding prompts, sessions and the activity log
    pub database_path: String,
}

/// Telemetry hub configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Period of the flush timer (in milliseconds)
    pub flush_interval_ms: u64,
    /// Capacity of each observer's outbound queue
    pub observer_buffer: usize,
}

/// Agent socket configuration
#[derive(Debug, Clone)]
pub struct AgentConnectionConfig {
    /// Interval between server pings (in seconds)
    pub ping_interval_secs: u64,
    /// Close the socket after this long without any inbound frame; 0 disables
    pub idle_timeout_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                port: env_or("PORT", 8080),
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            },
            persistence: PersistenceConfig {
                database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| {
                    if let Some(home) = env::var_os("HOME") {
                        format!("{}/.agent-dispatch/dispatch.db", home.to_string_lossy())
                    } else {
                        ".agent-dispatch/dispatch.db".to_string()
                    }
                }),
            },
            telemetry: TelemetryConfig {
                flush_interval_ms: env_or("TELEMETRY_FLUSH_MS", 250),
                observer_buffer: env_or("OBSERVER_BUFFER", 256),
            },
            agents: AgentConnectionConfig {
                ping_interval_secs: env_or("AGENT_PING_INTERVAL_SECS", 30),
                idle_timeout_secs: env_or("AGENT_IDLE_TIMEOUT_SECS", 90),
            },
        }
    }

    /// Get the server address as a string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Flush period of the telemetry hub
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry.flush_interval_ms.max(1))
    }

    /// Liveness timeout for agent sockets, if enabled
    pub fn agent_idle_timeout(&self) -> Option<Duration> {
        match self.agents.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 8080,
                host: "0.0.0.0".to_string(),
            },
            persistence: PersistenceConfig {
                database_path: ".agent-dispatch/dispatch.db".to_string(),
            },
            telemetry: TelemetryConfig {
                flush_interval_ms: 250,
                observer_buffer: 256,
            },
            agents: AgentConnectionConfig {
                ping_interval_secs: 30,
                idle_timeout_secs: 90,
            },
        }
    }
}
