//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the session affinity proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection ceiling).
    pub listener: ListenerConfig,

    /// Upstream backends requests are forwarded to.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Shared session store connection settings.
    pub store: StoreConfig,

    /// Session header protocol and TTL policy.
    pub session: SessionConfig,

    /// Session Resource API settings.
    pub management: ManagementConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Upstream backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Backend addresses (e.g., "127.0.0.1:3000"). Requests rotate over them.
    pub backends: Vec<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            backends: vec!["127.0.0.1:3000".to_string()],
        }
    }
}

/// Timeout configuration for client-facing and upstream operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Upstream connection establishment timeout in seconds.
    pub upstream_connect_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            upstream_connect_secs: 5,
        }
    }
}

/// Which store implementation backs the session pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// A Redis-compatible server.
    Redis,
    /// Process-local store, for development and tests.
    Memory,
}

/// Session store connection settings.
///
/// Resolved once at startup; the pool never re-reads them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub host: String,
    pub port: u16,

    /// Authentication is attempted only when a password is configured.
    pub password: Option<String>,

    /// Logical database index.
    pub database: Option<u8>,

    /// Connect + authenticate deadline in milliseconds.
    pub connect_timeout_ms: u64,

    /// Per-command deadline in milliseconds.
    pub command_timeout_ms: u64,

    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout_ms: u64,

    /// Maximum number of open connections, idle and checked out together.
    pub pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Redis,
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            database: None,
            connect_timeout_ms: 1000,
            command_timeout_ms: 1000,
            idle_timeout_ms: 10_000,
            pool_size: 100,
        }
    }
}

impl StoreConfig {
    /// "host:port" endpoint string.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// The configured credential, with an empty string treated as absent.
    pub fn credential(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}

/// Session header protocol and persistence policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie carrying the session identifier. Takes precedence over `id_header`.
    pub cookie_name: String,

    /// Header carrying the identifier, inbound fallback and outbound annotation.
    pub id_header: String,

    /// Header carrying the sanitized payload toward the backend.
    pub data_header: String,

    /// Response header the backend uses to declare new session state.
    pub mutation_header: String,

    /// TTL applied on every write, in seconds.
    pub ttl_secs: u64,

    /// Namespace prepended to every store key.
    pub key_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "PHPSESSID".to_string(),
            id_header: "X-Session-Id".to_string(),
            data_header: "X-Session-Data".to_string(),
            mutation_header: "X-New-Session-Data".to_string(),
            ttl_secs: 86_400,
            key_prefix: "session:".to_string(),
        }
    }
}

impl SessionConfig {
    /// Store key for an identifier.
    pub fn key_for(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id)
    }
}

/// Session Resource API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagementConfig {
    /// Mount the management routes on the proxy listener.
    pub enabled: bool,

    /// Path the session resource is served under.
    pub path: String,

    /// Optional bearer token. Absent means the surface is open.
    pub api_key: Option<String>,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/session".to_string(),
            api_key: None,
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
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
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
