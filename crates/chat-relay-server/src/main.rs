//! Chat relay HTTP server.
//!
//! Run with: cargo run -p chat-relay-server
//!
//! Configure the upstream with `CHATBOT_URL` (and optionally `CHATBOT_MODEL`,
//! `CHATBOT_BACKEND`, `HF_TOKEN`), then POST to http://localhost:3000/api/chat.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use chat_relay_backend::{ChatCompletionsBackend, InferenceBackend};
use chat_relay_core::{Backend, BackendKind, MessageStore, RelayConfig};
use chat_relay_session::{ChatPipeline, MultiAgentOrchestrator, PersistenceSink};
use chat_relay_transport::{AppState, router};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BIND: &str = "127.0.0.1:3000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = RelayConfig::from_env();
    // Bad config is reported per request, not at startup.
    if let Err(e) = config.validate() {
        tracing::warn!("Configuration incomplete, chat requests will fail: {e}");
    }
    let config = Arc::new(config);

    let backend = build_backend(&config);
    let store = open_store().await?;
    let sink = PersistenceSink::spawn(Arc::clone(&store));

    let pipeline =
        ChatPipeline::new(Arc::clone(&config), Arc::clone(&backend)).with_persistence(store, sink);
    let orchestrator = MultiAgentOrchestrator::new(config, backend);

    let app = router(AppState::new(pipeline, orchestrator)).layer(CorsLayer::permissive());

    let addr: SocketAddr = std::env::var("CHATBOT_BIND")
        .unwrap_or_else(|_| DEFAULT_BIND.to_string())
        .parse()
        .context("CHATBOT_BIND is not a socket address")?;
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_backend(config: &RelayConfig) -> Arc<dyn Backend> {
    match config.backend {
        BackendKind::Chat => Arc::new(ChatCompletionsBackend::new(config.api_token.clone())),
        BackendKind::Inference => Arc::new(InferenceBackend::new(
            config.api_token.clone().unwrap_or_default(),
        )),
    }
}

#[cfg(feature = "sqlite")]
async fn open_store() -> anyhow::Result<Arc<dyn MessageStore>> {
    use chat_relay_session::storage::{MemoryStore, SqliteStore};

    match std::env::var("CHATBOT_DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let store = SqliteStore::new(&url)
                .await
                .with_context(|| format!("failed to open {url}"))?;
            tracing::info!(%url, "Using SQLite message store");
            Ok(Arc::new(store))
        }
        _ => Ok(Arc::new(MemoryStore::new())),
    }
}

#[cfg(not(feature = "sqlite"))]
#[allow(clippy::unused_async)]
async fn open_store() -> anyhow::Result<Arc<dyn MessageStore>> {
    Ok(Arc::new(chat_relay_session::storage::MemoryStore::new()))
}
