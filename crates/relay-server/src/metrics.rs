//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Channel events not delivered because a client queue was full or closed (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Upgrades refused at the connection limit (counter).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Turns started (counter, labels: mode).
pub const RELAY_TURNS_TOTAL: &str = "relay_turns_total";
/// Turns failed (counter, labels: mode, stage).
pub const RELAY_TURN_FAILURES_TOTAL: &str = "relay_turn_failures_total";
/// Turn duration (histogram, labels: mode).
pub const RELAY_TURN_DURATION_SECONDS: &str = "relay_turn_duration_seconds";
/// Malformed stream frames degraded to raw chunks (counter).
pub const RELAY_DECODE_WARNINGS_TOTAL: &str = "relay_decode_warnings_total";
/// Expired sessions removed by the sweep (counter).
pub const RELAY_SESSIONS_PURGED_TOTAL: &str = "relay_sessions_purged_total";
