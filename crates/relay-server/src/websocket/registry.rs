//! Client channel registry: which connections hear which sessions.
//!
//! A concurrency-safe multimap in both directions. `emit` serializes the
//! envelope once, snapshots the recipients, releases the lock, then queues
//! to each recipient in turn, so one session's events reach every listener
//! in emit order. A connection that cannot take a turn's final event is
//! closed so the client reconnects instead of waiting on a turn that ended.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use relay_core::{ChannelEnvelope, ChannelEvent, ConnectionId, SessionId};
use relay_runtime::TurnEventSink;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use crate::metrics::WS_SEND_DROPS_TOTAL;

#[derive(Default)]
struct Bindings {
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
    by_session: HashMap<SessionId, HashSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, HashSet<SessionId>>,
}

/// Session-to-connection bindings for event fan-out.
pub struct ClientChannelRegistry {
    bindings: RwLock<Bindings>,
    send_timeout: Duration,
}

impl ClientChannelRegistry {
    /// Create an empty registry; `send_timeout` bounds each per-connection wait.
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            bindings: RwLock::new(Bindings::default()),
            send_timeout,
        }
    }

    /// Track a live connection. It hears nothing until it joins a session.
    pub async fn register(&self, connection: Arc<ClientConnection>) {
        let mut b = self.bindings.write().await;
        let _ = b.connections.insert(connection.id.clone(), connection);
    }

    /// Bind `connection_id` to `session_id`.
    ///
    /// Returns `false` if the connection is not registered.
    pub async fn join(&self, session_id: &SessionId, connection_id: &ConnectionId) -> bool {
        let mut b = self.bindings.write().await;
        if !b.connections.contains_key(connection_id) {
            return false;
        }
        let _ = b
            .by_session
            .entry(session_id.clone())
            .or_default()
            .insert(connection_id.clone());
        let _ = b
            .by_connection
            .entry(connection_id.clone())
            .or_default()
            .insert(session_id.clone());
        debug!(%session_id, conn_id = %connection_id, "joined session");
        true
    }

    /// Unbind one session from a connection. Returns whether it was bound.
    pub async fn leave_session(&self, session_id: &SessionId, connection_id: &ConnectionId) -> bool {
        let mut b = self.bindings.write().await;
        let removed = b
            .by_connection
            .get_mut(connection_id)
            .is_some_and(|sessions| sessions.remove(session_id));
        if removed {
            unbind(&mut b, session_id, connection_id);
            if b.by_connection.get(connection_id).is_some_and(HashSet::is_empty) {
                let _ = b.by_connection.remove(connection_id);
            }
        }
        removed
    }

    /// Forget a connection and every session it joined. Idempotent.
    ///
    /// Returns the sessions it was bound to.
    pub async fn leave(&self, connection_id: &ConnectionId) -> Vec<SessionId> {
        let mut b = self.bindings.write().await;
        let _ = b.connections.remove(connection_id);
        let sessions: Vec<SessionId> = b
            .by_connection
            .remove(connection_id)
            .map(|s| s.into_iter().collect())
            .unwrap_or_default();
        for session_id in &sessions {
            unbind(&mut b, session_id, connection_id);
        }
        sessions
    }

    /// Deliver `event` to every connection joined to `session_id`.
    ///
    /// A no-op when nobody is joined. Returns the number of connections that
    /// accepted the event.
    pub async fn emit(&self, session_id: &SessionId, event: ChannelEvent) -> usize {
        let recipients = self.session_connections(session_id).await;
        if recipients.is_empty() {
            return 0;
        }

        let event_type = event.event_type();
        let terminal = event.is_turn_terminal();
        let json = match ChannelEnvelope::new(event, Some(session_id.clone())).to_json() {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(event_type, error = %e, "failed to serialize event");
                return 0;
            }
        };

        let mut delivered = 0;
        for conn in &recipients {
            if conn.deliver(Arc::clone(&json), self.send_timeout).await {
                delivered += 1;
            } else {
                counter!(WS_SEND_DROPS_TOTAL).increment(1);
                warn!(conn_id = %conn.id, %session_id, event_type, "failed to send event to client");
                if terminal {
                    warn!(conn_id = %conn.id, %session_id, "closing connection that missed the end of a turn");
                    conn.close();
                }
            }
        }
        debug!(%session_id, event_type, recipients = recipients.len(), delivered, "emitted event");
        delivered
    }

    /// Connections currently joined to `session_id`.
    pub async fn session_connections(&self, session_id: &SessionId) -> Vec<Arc<ClientConnection>> {
        let b = self.bindings.read().await;
        b.by_session
            .get(session_id)
            .into_iter()
            .flatten()
            .filter_map(|id| b.connections.get(id).cloned())
            .collect()
    }

    /// Sessions `connection_id` has joined.
    pub async fn joined_sessions(&self, connection_id: &ConnectionId) -> Vec<SessionId> {
        let b = self.bindings.read().await;
        b.by_connection
            .get(connection_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.bindings.read().await.connections.len()
    }

    /// Number of sessions with at least one joined connection.
    pub async fn session_count(&self) -> usize {
        self.bindings.read().await.by_session.len()
    }
}

fn unbind(b: &mut Bindings, session_id: &SessionId, connection_id: &ConnectionId) {
    if let Some(conns) = b.by_session.get_mut(session_id) {
        let _ = conns.remove(connection_id);
        if conns.is_empty() {
            let _ = b.by_session.remove(session_id);
        }
    }
}

#[async_trait]
impl TurnEventSink for ClientChannelRegistry {
    async fn emit(&self, session_id: &SessionId, event: ChannelEvent) -> usize {
        ClientChannelRegistry::emit(self, session_id, event).await
    }
}
