//! WebSocket connection management, message dispatch, and session fan-out.

pub mod connection;
pub mod handler;
pub mod registry;
pub mod session;
