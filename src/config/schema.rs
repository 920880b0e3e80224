//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Connection router settings.
    pub mux: MuxConfig,

    /// Persistence backend.
    pub database: DatabaseConfig,

    /// gRPC service settings.
    pub rpc: RpcConfig,

    /// HTTP debugging console.
    pub console: ConsoleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Connection router configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Time budget for classifying a new connection, in milliseconds.
    pub read_timeout_ms: u64,

    /// Size budget for the buffered prefix of a new connection.
    pub max_prefix_bytes: usize,

    /// Capacity of each virtual listener's accept queue.
    pub queue_capacity: usize,

    /// Maximum connections classified concurrently (backpressure on accept).
    pub max_pending: usize,
}

impl MuxConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 2_000,
            max_prefix_bytes: 16 * 1024,
            queue_capacity: 128,
            max_pending: 10_000,
        }
    }
}

/// Which store implementation backs the RPC service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,

    /// Postgres connection string (overridden by `POSTGRES_URL` / `DATABASE_URL`).
    pub url: String,

    /// Pool size.
    pub max_connections: u32,

    /// Pool acquire timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Apply the embedded migrations on startup.
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Postgres,
            url: String::new(),
            max_connections: 5,
            connect_timeout_secs: 5,
            run_migrations: true,
        }
    }
}

/// gRPC service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Page size used when a list request carries `limit = 0`.
    pub default_page_size: u32,

    /// Upper bound applied to every list request.
    pub max_page_size: u32,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 1_000,
            request_timeout_secs: 30,
        }
    }
}

/// Debugging console configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Serve the console on the catch-all listener.
    pub enabled: bool,

    /// Address the console's gRPC client dials. Defaults to the gateway's
    /// own listening address (loopback when bound to an unspecified address).
    pub dial_address: Option<String>,

    /// Deadline for the console's self-dial at startup, in seconds.
    pub dial_timeout_secs: u64,

    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dial_address: None,
            dial_timeout_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
