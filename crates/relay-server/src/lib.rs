//! # relay-server
//!
//! Axum HTTP + `WebSocket` front end for the relay.
//!
//! - REST: session creation, history, reset, blocking chat turns
//! - `WebSocket` gateway: join/leave sessions, streaming turns, heartbeat
//! - [`ClientChannelRegistry`](websocket::registry::ClientChannelRegistry)
//!   fans turn events out to every connection joined to a session
//! - Prometheus `/metrics`, `/health`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, RelayServer};
pub use websocket::registry::ClientChannelRegistry;
