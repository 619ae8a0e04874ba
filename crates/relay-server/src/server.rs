//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_llm::GeneratorHandle;
use relay_retrieval::RetrieverHandle;
use relay_runtime::{TurnConfig, TurnEventSink, TurnOrchestrator};
use relay_store::SessionStoreHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::metrics::RELAY_SESSIONS_PURGED_TOTAL;
use crate::routes;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::registry::ClientChannelRegistry;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Turn orchestrator (owns the session store handle).
    pub orchestrator: Arc<TurnOrchestrator>,
    /// Session-to-connection bindings.
    pub registry: Arc<ClientChannelRegistry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    /// Wire the registry and orchestrator around the given collaborators.
    pub fn new(
        config: ServerConfig,
        store: SessionStoreHandle,
        retriever: RetrieverHandle,
        generator: GeneratorHandle,
        turn: TurnConfig,
    ) -> Self {
        let registry = Arc::new(ClientChannelRegistry::new(config.send_timeout()));
        let sink: Arc<dyn TurnEventSink> = registry.clone();
        let orchestrator = Arc::new(TurnOrchestrator::new(store, retriever, generator, sink, turn));
        Self {
            state: AppState {
                config: Arc::new(config),
                orchestrator,
                registry,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
                metrics: None,
            },
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/session", post(routes::create_session))
            .route("/history/{session_id}", get(routes::history))
            .route("/reset/{session_id}", post(routes::reset))
            .route("/chat/{session_id}", post(routes::chat))
            .route("/health", get(routes::health_handler))
            .route("/metrics", get(routes::metrics_handler))
            .route("/ws", get(routes::ws_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve until shutdown. Returns the bound address and the
    /// server task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), std::io::Error> {
        let config = &self.state.config;
        let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "relay server listening");

        let router = self.router();
        let token = self.state.shutdown.token();
        let purge = spawn_purge_task(&self.state);
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "server stopped with error");
            }
            purge.abort();
        });
        Ok((addr, handle))
    }

    /// Shared handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The client channel registry.
    pub fn registry(&self) -> &Arc<ClientChannelRegistry> {
        &self.state.registry
    }

    /// The turn orchestrator.
    pub fn orchestrator(&self) -> &Arc<TurnOrchestrator> {
        &self.state.orchestrator
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

fn spawn_purge_task(state: &AppState) -> JoinHandle<()> {
    let store = Arc::clone(state.orchestrator.store());
    let every = state.config.purge_interval();
    let token = state.shutdown.token();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        let _ = interval.tick().await;
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = interval.tick() => match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(n) => {
                        counter!(RELAY_SESSIONS_PURGED_TOTAL).increment(u64::try_from(n).unwrap_or(u64::MAX));
                        debug!(purged = n, "expired sessions removed");
                    }
                    Err(e) => warn!(error = %e, "expired session sweep failed"),
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures::stream;
    use relay_core::{ContextSnippet, IncrementalEvent};
    use relay_llm::{Generator, IncrementalEventStream, UpstreamError};
    use relay_retrieval::{ContextRetriever, RetrievalError};
    use relay_store::MemorySessionStore;
    use std::time::Duration;
    use tower::ServiceExt;

    struct OneSnippet;

    #[async_trait]
    impl ContextRetriever for OneSnippet {
        async fn retrieve(&self, _q: &str, _k: usize) -> Result<Vec<ContextSnippet>, RetrievalError> {
            Ok(vec![ContextSnippet::new("Paris is the capital of France.", Some("doc1"))])
        }
    }

    struct Canned(Option<&'static str>);

    #[async_trait]
    impl Generator for Canned {
        async fn generate(&self, _p: &str, _m: u32) -> Result<Option<String>, UpstreamError> {
            Ok(self.0.map(str::to_owned))
        }

        async fn stream(&self, _p: &str, _m: u32) -> Result<IncrementalEventStream, UpstreamError> {
            let answer = self.0.unwrap_or_default().to_string();
            Ok(Box::pin(stream::iter(vec![Ok::<_, UpstreamError>(IncrementalEvent::Done(answer))])))
        }
    }

    fn make_server(answer: Option<&'static str>) -> RelayServer {
        RelayServer::new(
            ServerConfig::default(),
            Arc::new(MemorySessionStore::new(Duration::from_secs(60))),
            Arc::new(OneSnippet),
            Arc::new(Canned(answer)),
            TurnConfig::default(),
        )
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server(Some("x"));
        let (status, body) = call(server.router(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["store"], "memory");
    }

    #[tokio::test]
    async fn create_session_returns_fresh_id() {
        let server = make_server(Some("x"));
        let (status, body) = call(server.router(), "POST", "/session", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["sessionId"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_then_history_then_reset() {
        let server = make_server(Some("Paris."));
        let (_, created) = call(server.router(), "POST", "/session", None).await;
        let id = created["sessionId"].as_str().unwrap().to_string();

        let (status, reply) = call(
            server.router(),
            "POST",
            &format!("/chat/{id}"),
            Some(r#"{"message":"capital of France?"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["answer"], "Paris.");
        assert_eq!(reply["contexts"][0]["metadata"]["source"], "doc1");

        let (_, hist) = call(server.router(), "GET", &format!("/history/{id}"), None).await;
        let entries = hist["history"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["role"], "user");
        assert_eq!(entries[1]["text"], "Paris.");

        let (status, cleared) = call(server.router(), "POST", &format!("/reset/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cleared["cleared"], true);

        let (_, hist) = call(server.router(), "GET", &format!("/history/{id}"), None).await;
        assert!(hist["history"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_without_answer_falls_back() {
        let server = make_server(None);
        let (_, reply) = call(
            server.router(),
            "POST",
            "/chat/s1",
            Some(r#"{"message":"hello"}"#),
        )
        .await;
        assert_eq!(reply["answer"], "No response");
    }

    #[tokio::test]
    async fn chat_with_empty_message_is_bad_request() {
        let server = make_server(Some("x"));
        let (status, body) =
            call(server.router(), "POST", "/chat/s1", Some(r#"{"message":"  "}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn unknown_history_is_empty() {
        let server = make_server(Some("x"));
        let (status, body) = call(server.router(), "GET", "/history/nope", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["history"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let server = make_server(Some("x"));
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server(Some("x"));
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_and_stops_on_shutdown() {
        let server = make_server(Some("x"));
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
