//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use relay_core::{ChannelEnvelope, ChannelEvent, ConnectionId, SessionId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A connected WebSocket client.
///
/// Which sessions it has joined lives in the registry, not here.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Cancelled on disconnect; parent of this connection's turns.
    cancel: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded to the last ping.
    is_alive: AtomicBool,
    /// When the last pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Messages dropped because the queue was full or closed.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>, cancel: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            cancel,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a text frame without waiting.
    ///
    /// Returns `false` if the queue is full or closed.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Queue a text frame, waiting up to `timeout` for queue space.
    pub async fn deliver(&self, message: Arc<String>, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.tx.send(message)).await {
            Ok(Ok(())) => true,
            _ => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Wrap `event` in an envelope and queue it.
    pub fn send_event(&self, event: ChannelEvent, session_id: Option<SessionId>) -> bool {
        let event_type = event.event_type();
        match ChannelEnvelope::new(event, session_id).to_json() {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                warn!(conn_id = %self.id, event_type, error = %e, "failed to serialize event");
                false
            }
        }
    }

    /// Token cancelled when this connection goes away.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel the connection and everything started from it.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether [`close`](Self::close) has been called (or the server is stopping).
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
