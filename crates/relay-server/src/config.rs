//! Server configuration.

use std::time::Duration;

use relay_settings::RelaySettings;
use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Drop a connection after this long without a pong.
    pub pong_timeout_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per connection.
    pub send_buffer_size: usize,
    /// How long an emit waits on one full connection queue.
    pub send_timeout_ms: u64,
    /// Drain budget on shutdown.
    pub shutdown_timeout_secs: u64,
    /// Idle TTL applied to newly created sessions.
    pub session_ttl_secs: u64,
    /// Interval of the expired-session sweep.
    pub purge_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 256,
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 60,
            max_message_size: 1024 * 1024,
            send_buffer_size: 1024,
            send_timeout_ms: 5_000,
            shutdown_timeout_secs: 30,
            session_ttl_secs: 86_400,
            purge_interval_secs: 300,
        }
    }
}

impl ServerConfig {
    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Pong deadline.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Per-connection emit timeout.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Shutdown drain budget.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Session idle TTL.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Expired-session sweep interval.
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}

impl From<&RelaySettings> for ServerConfig {
    fn from(settings: &RelaySettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections,
            heartbeat_interval_secs: server.heartbeat_interval_secs,
            pong_timeout_secs: server.pong_timeout_secs,
            max_message_size: server.max_message_size,
            send_buffer_size: server.send_buffer_size.max(1),
            shutdown_timeout_secs: server.shutdown_timeout_secs,
            session_ttl_secs: settings.store.session_ttl_secs,
            ..Self::default()
        }
    }
}
