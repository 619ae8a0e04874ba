//! Generation events and client-facing channel events.
//!
//! Two event families flow through a streaming turn:
//!
//! - [`IncrementalEvent`]: what the decoder produces from the generation
//!   backend's framed stream. Consumed once, in arrival order.
//! - [`ChannelEvent`]: what clients joined to a session receive, wrapped in a
//!   [`ChannelEnvelope`] with the session id and a timestamp.

use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// One decoded unit of generation output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IncrementalEvent {
    /// A fragment of answer text.
    Chunk(String),
    /// Generation finished; carries the full final answer.
    Done(String),
    /// The backend reported a failure.
    Error(String),
}

impl IncrementalEvent {
    /// Whether this event ends the stream (`Done` or `Error`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_))
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chunk(_) => "chunk",
            Self::Done(_) => "done",
            Self::Error(_) => "error",
        }
    }
}

/// Event pushed to clients over the live channel.
///
/// Serialized adjacently tagged: `{"type": "bot_chunk", "data": {"chunk": ".."}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChannelEvent {
    /// Sent once right after the connection is accepted.
    #[serde(rename = "connection.established", rename_all = "camelCase")]
    ConnectionEstablished {
        /// Server-assigned connection id.
        client_id: String,
    },
    /// Acknowledges an `init` join.
    #[serde(rename = "session_joined", rename_all = "camelCase")]
    SessionJoined {
        /// Session now joined.
        session_id: SessionId,
    },
    /// Acknowledges a `leave`.
    #[serde(rename = "session_left", rename_all = "camelCase")]
    SessionLeft {
        /// Session no longer joined.
        session_id: SessionId,
    },
    /// Incremental answer fragment.
    #[serde(rename = "bot_chunk")]
    BotChunk {
        /// Fragment text.
        chunk: String,
    },
    /// Turn completed.
    #[serde(rename = "bot_done")]
    BotDone {
        /// Full final answer.
        answer: String,
    },
    /// Turn failed.
    #[serde(rename = "bot_error")]
    BotError {
        /// Human-readable failure description.
        error: String,
    },
    /// The client sent something the server could not act on.
    #[serde(rename = "error")]
    ProtocolError {
        /// What was wrong with the inbound frame.
        message: String,
    },
}

impl ChannelEvent {
    /// Wire `type` string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection.established",
            Self::SessionJoined { .. } => "session_joined",
            Self::SessionLeft { .. } => "session_left",
            Self::BotChunk { .. } => "bot_chunk",
            Self::BotDone { .. } => "bot_done",
            Self::BotError { .. } => "bot_error",
            Self::ProtocolError { .. } => "error",
        }
    }

    /// Whether this event closes out a turn for the client.
    pub fn is_turn_terminal(&self) -> bool {
        matches!(self, Self::BotDone { .. } | Self::BotError { .. })
    }
}

/// Outbound wire envelope: the event plus routing metadata.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEnvelope {
    /// The event (`type` + `data` flattened into the envelope).
    #[serde(flatten)]
    pub event: ChannelEvent,
    /// Session the event belongs to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// RFC 3339 emission time.
    pub timestamp: String,
}

impl ChannelEnvelope {
    /// Wrap an event stamped with the current time.
    pub fn new(event: ChannelEvent, session_id: Option<SessionId>) -> Self {
        Self {
            event,
            session_id,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }

    /// Serialize to the JSON text sent over the socket.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
