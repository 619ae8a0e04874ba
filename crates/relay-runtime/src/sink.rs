//! Where a streaming turn's events go.

use async_trait::async_trait;
use relay_core::{ChannelEvent, SessionId};

/// Delivers channel events to whoever is listening on a session.
///
/// Events for one session must reach each listener in the order `emit` is
/// called. Emitting to a session nobody has joined is a silent no-op.
#[async_trait]
pub trait TurnEventSink: Send + Sync {
    /// Deliver `event`; returns how many listeners received it.
    async fn emit(&self, session_id: &SessionId, event: ChannelEvent) -> usize;
}

/// Sink that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

#[async_trait]
impl TurnEventSink for NullSink {
    async fn emit(&self, _session_id: &SessionId, _event: ChannelEvent) -> usize {
        0
    }
}
