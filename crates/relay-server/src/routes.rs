//! REST routes: session plumbing and the blocking turn form.

use axum::Json;
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use metrics::counter;
use relay_core::{ConnectionId, SessionId, TurnEntry};
use relay_runtime::{TurnError, TurnReply};
use relay_store::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::server::AppState;
use crate::websocket::session::run_ws_session;

/// Error body `{"error": ".."}` with a mapped status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<TurnError> for ApiError {
    fn from(e: TurnError) -> Self {
        let status = match &e {
            TurnError::Retrieval(_) | TurnError::Upstream(_) => StatusCode::BAD_GATEWAY,
            TurnError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TurnError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TurnError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            message: e.client_message(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        warn!(error = %e, "session store request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "session store unavailable".into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// `POST /session` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    /// Fresh session id.
    pub session_id: SessionId,
}

/// `GET /history/{id}` response.
#[derive(Debug, Serialize)]
pub struct History {
    /// Entries in append order.
    pub history: Vec<TurnEntry>,
}

/// `POST /chat/{id}` body.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// User text.
    pub message: String,
}

/// POST /session
pub async fn create_session(State(state): State<AppState>) -> Result<Json<CreatedSession>, ApiError> {
    let session_id = SessionId::new();
    state
        .orchestrator
        .store()
        .create_session(&session_id, state.config.session_ttl())
        .await?;
    info!(%session_id, "session created");
    Ok(Json(CreatedSession { session_id }))
}

/// GET /history/{session_id}
pub async fn history(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<History>, ApiError> {
    let history = state.orchestrator.store().list(&session_id).await?;
    Ok(Json(History { history }))
}

/// POST /reset/{session_id}
pub async fn reset(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.orchestrator.store().clear(&session_id).await?;
    info!(%session_id, "session reset");
    Ok(Json(json!({ "cleared": true })))
}

/// POST /chat/{session_id}
pub async fn chat(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<TurnReply>, ApiError> {
    let reply = state
        .orchestrator
        .run_blocking_turn(&session_id, &body.message)
        .await?;
    Ok(Json(reply))
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.registry.connection_count().await;
    let sessions = state.registry.session_count().await;
    Json(health::health_check(
        state.start_time,
        connections,
        sessions,
        state.orchestrator.store().backend_name(),
    ))
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.registry.connection_count().await >= state.config.max_connections {
        counter!(WS_REJECTED_TOTAL).increment(1);
        warn!(limit = state.config.max_connections, "connection limit reached");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let connection_id = ConnectionId::new();
    debug!(conn_id = %connection_id, "upgrading connection");
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, connection_id, state))
}
