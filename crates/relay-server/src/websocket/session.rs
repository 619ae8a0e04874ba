//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use relay_core::{ChannelEvent, ConnectionId};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::{binary_as_text, handle_message};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::server::AppState;

/// Run a WebSocket session for a connected client.
///
/// 1. Sends `connection.established` with the connection id
/// 2. Dispatches inbound text frames (`init`, `leave`, `user_message`)
/// 3. Forwards queued outbound events
/// 4. Pings periodically and drops clients silent past the pong timeout
/// 5. On disconnect leaves every session and cancels in-flight turns
#[instrument(skip_all, fields(conn_id = %connection_id))]
pub async fn run_ws_session(ws: WebSocket, connection_id: ConnectionId, state: AppState) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(state.config.send_buffer_size);
    let cancel = state.shutdown.child_token();
    let connection = Arc::new(ClientConnection::new(
        connection_id.clone(),
        send_tx,
        cancel.clone(),
    ));

    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    state.registry.register(Arc::clone(&connection)).await;
    let _ = connection.send_event(
        ChannelEvent::ConnectionEstablished {
            client_id: connection_id.to_string(),
        },
        None,
    );

    let ping_every = state.config.heartbeat_interval();
    let pong_timeout = state.config.pong_timeout();
    let outbound_conn = Arc::clone(&connection);
    let outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive()
                        && outbound_conn.last_pong_elapsed() > pong_timeout
                    {
                        warn!(timeout = ?pong_timeout, "client unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = outbound_conn.cancel_token().cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        // wake the inbound loop if the writer gave up first
        outbound_conn.close();
    });

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let Some(Ok(msg)) = frame else { break };

        let text = match msg {
            Message::Text(ref t) => Some(t.as_str()),
            Message::Binary(ref data) => binary_as_text(data),
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.mark_alive();
                None
            }
        };
        let Some(text) = text else { continue };

        connection.mark_alive();
        handle_message(text, &connection, &state).await;
    }

    connection.close();
    let left = state.registry.leave(&connection_id).await;
    info!(
        sessions = left.len(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
    outbound.abort();
}
