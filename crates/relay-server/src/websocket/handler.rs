//! Inbound frame parsing and dispatch.

use std::sync::Arc;

use relay_core::{ChannelEvent, SessionId};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::connection::ClientConnection;
use crate::server::AppState;

/// A message a client may send over the socket.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Join a session's event stream.
    #[serde(rename_all = "camelCase")]
    Init {
        /// Session to join.
        session_id: SessionId,
    },
    /// Stop hearing a session.
    #[serde(rename_all = "camelCase")]
    Leave {
        /// Session to leave.
        session_id: SessionId,
    },
    /// Start a streaming turn.
    #[serde(rename_all = "camelCase")]
    UserMessage {
        /// Session the turn belongs to.
        session_id: SessionId,
        /// User text.
        message: String,
    },
}

/// Parse one inbound text frame.
pub fn parse_message(text: &str) -> Result<InboundMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Handle one inbound text frame from `connection`.
///
/// Malformed frames are answered with an `error` event; the connection stays
/// open. Turns run on their own task under the connection's token.
pub async fn handle_message(text: &str, connection: &Arc<ClientConnection>, state: &AppState) {
    let message = match parse_message(text) {
        Ok(m) => m,
        Err(e) => {
            debug!(conn_id = %connection.id, error = %e, "malformed inbound frame");
            let _ = connection.send_event(
                ChannelEvent::ProtocolError {
                    message: format!("invalid message: {e}"),
                },
                None,
            );
            return;
        }
    };

    match message {
        InboundMessage::Init { session_id } => {
            if state.registry.join(&session_id, &connection.id).await {
                let _ = connection.send_event(
                    ChannelEvent::SessionJoined {
                        session_id: session_id.clone(),
                    },
                    Some(session_id),
                );
            }
        }
        InboundMessage::Leave { session_id } => {
            let _ = state.registry.leave_session(&session_id, &connection.id).await;
            let _ = connection.send_event(
                ChannelEvent::SessionLeft {
                    session_id: session_id.clone(),
                },
                Some(session_id),
            );
        }
        InboundMessage::UserMessage {
            session_id,
            message,
        } => {
            info!(conn_id = %connection.id, %session_id, "user message received");
            let orchestrator = Arc::clone(&state.orchestrator);
            let cancel = connection.cancel_token().child_token();
            let _ = tokio::spawn(async move {
                if let Err(e) = orchestrator
                    .run_streaming_turn(&session_id, &message, &cancel)
                    .await
                {
                    debug!(%session_id, error = %e, "streaming turn ended without an answer");
                }
            });
        }
    }
}

/// Decode a binary frame as UTF-8 text.
pub fn binary_as_text(data: &[u8]) -> Option<&str> {
    match std::str::from_utf8(data) {
        Ok(s) => Some(s),
        Err(_) => {
            warn!(len = data.len(), "received non-UTF8 binary frame");
            None
        }
    }
}
