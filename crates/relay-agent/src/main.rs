//! # relay-agent
//!
//! Relay server binary: loads settings, wires the session store, retrieval
//! and generation clients, and starts the HTTP/WebSocket server.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::logging::init_subscriber;
use relay_llm::HttpGenerator;
use relay_retrieval::HttpRetriever;
use relay_runtime::TurnConfig;
use relay_server::{RelayServer, ServerConfig};
use relay_settings::{RelaySettings, StoreBackend, StoreSettings};
use relay_store::{
    MemorySessionStore, RedisSessionStore, SessionStoreHandle, SqliteSessionStore,
};
use tracing::info;

/// Relay server.
#[derive(Parser, Debug)]
#[command(name = "relay-agent", about = "Streaming chat relay with session history")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Session store backend: memory, sqlite, or redis.
    #[arg(long)]
    store: Option<StoreBackend>,

    /// Settings file (default `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(backend) = self.store {
            settings.store.backend = backend;
        }
    }
}

fn sqlite_path(store: &StoreSettings) -> PathBuf {
    if store.sqlite_path.is_empty() {
        relay_settings::loader::relay_home().join("sessions.db")
    } else {
        PathBuf::from(&store.sqlite_path)
    }
}

fn open_store(store: &StoreSettings) -> Result<SessionStoreHandle> {
    let ttl = Duration::from_secs(store.session_ttl_secs);
    let handle: SessionStoreHandle = match store.backend {
        StoreBackend::Memory => Arc::new(MemorySessionStore::new(ttl)),
        StoreBackend::Sqlite => {
            let path = sqlite_path(store);
            Arc::new(
                SqliteSessionStore::open(&path, ttl)
                    .with_context(|| format!("Failed to open session database: {}", path.display()))?,
            )
        }
        StoreBackend::Redis => Arc::new(
            RedisSessionStore::new(&store.redis_url, store.key_prefix.clone(), ttl)
                .with_context(|| format!("Invalid Redis URL: {}", store.redis_url))?,
        ),
    };
    Ok(handle)
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = match &args.config {
        Some(path) => relay_settings::load_settings_from_path(path),
        None => relay_settings::load_settings(),
    }
    .context("Failed to load settings")?;
    args.apply(&mut settings);

    init_subscriber(&settings.logging.level, settings.logging.format);
    let metrics_handle =
        relay_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let store = open_store(&settings.store)?;

    let upstream = &settings.upstream;
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(upstream.connect_timeout_ms))
        .build()
        .context("Failed to build HTTP client")?;
    let request_timeout = Duration::from_millis(upstream.request_timeout_ms);
    let retriever = HttpRetriever::new(http.clone(), upstream.retrieval_url.clone())
        .with_timeout(request_timeout);
    let generator = HttpGenerator::new(
        http,
        upstream.generate_url.clone(),
        upstream.stream_url.clone(),
        request_timeout,
    );

    let turn = TurnConfig {
        top_k: settings.turn.top_k,
        max_tokens: settings.turn.max_tokens,
    };
    let server = RelayServer::new(
        ServerConfig::from(&settings),
        store,
        Arc::new(retriever),
        Arc::new(generator),
        turn,
    )
    .with_metrics(metrics_handle);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!(
        %addr,
        store = server.orchestrator().store().backend_name(),
        retrieval = %upstream.retrieval_url,
        stream = %upstream.stream_url,
        "relay listening"
    );

    shutdown_signal().await?;

    info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(vec![handle], server.config().shutdown_timeout())
        .await;
    info!("Shutdown complete");
    Ok(())
}
