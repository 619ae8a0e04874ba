//! Settings sections.
//!
//! Every section is `#[serde(default)]` so a settings file only needs the
//! keys it changes.

use relay_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Retrieval and generation backends.
    pub upstream: UpstreamSettings,
    /// Per-turn parameters.
    pub turn: TurnSettings,
    /// Session store backend.
    pub store: StoreSettings,
    /// Logging output.
    pub logging: LoggingSettings,
}

/// Network listener and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server pings.
    pub heartbeat_interval_secs: u64,
    /// Drop a connection after this long without a pong.
    pub pong_timeout_secs: u64,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per connection.
    pub send_buffer_size: usize,
    /// How long shutdown waits for in-flight work.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_connections: 256,
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 60,
            max_message_size: 1024 * 1024,
            send_buffer_size: 1024,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Upstream service endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// Context retrieval endpoint (`POST {query, top_k}`).
    pub retrieval_url: String,
    /// Blocking generation endpoint (`POST {prompt, max_tokens}`).
    pub generate_url: String,
    /// Streaming generation endpoint (SSE response).
    pub stream_url: String,
    /// Whole-request timeout for retrieval and blocking generation.
    /// Streaming requests never time out.
    pub request_timeout_ms: u64,
    /// TCP connect timeout for all upstream calls.
    pub connect_timeout_ms: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            retrieval_url: "http://localhost:8001/retrieve".to_string(),
            generate_url: "http://localhost:8002/generate".to_string(),
            stream_url: "http://localhost:8002/stream".to_string(),
            request_timeout_ms: 120_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Parameters applied to every turn.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TurnSettings {
    /// Snippets requested from the retriever.
    pub top_k: usize,
    /// Generation limit passed to the backend.
    pub max_tokens: u32,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_tokens: 512,
        }
    }
}

/// Which session store implementation to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local; lost on restart.
    #[default]
    Memory,
    /// `SQLite` file.
    Sqlite,
    /// Redis lists with native expiry.
    Redis,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Session store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Backend selection.
    pub backend: StoreBackend,
    /// Redis connection URL.
    pub redis_url: String,
    /// `SQLite` database path. Empty means `~/.relay/sessions.db`.
    pub sqlite_path: String,
    /// Key prefix for Redis transcript lists (`{prefix}:{sessionId}`).
    pub key_prefix: String,
    /// Idle expiry for a session transcript.
    pub session_ttl_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            sqlite_path: String::new(),
            key_prefix: "hist".to_string(),
            session_ttl_secs: 86_400,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
