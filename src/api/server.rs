use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{
    services::{
        cancel_download, delete_completed, get_config, get_downloads, get_file, get_stats,
        health, list_handlers, pause_download, reload_handlers, resume_download,
        submit_download,
    },
    state::AppState,
};
use crate::config::Config;
use crate::engine::{Aria2Client, EngineClient};
use crate::handlers::HandlerRegistry;
use crate::jobs::{Coordinator, JobStore, Reconciler};
use crate::observability::Metrics;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Build the application router over an assembled state.
/// Split out so tests can drive the routes without binding a socket.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/downloads", get(get_downloads))
        .route("/api/download", post(submit_download))
        .route("/api/download/{id}/pause", post(pause_download))
        .route("/api/download/{id}/resume", post(resume_download))
        .route("/api/download/{id}/cancel", post(cancel_download))
        .route("/api/completed/{id}/delete", post(delete_completed))
        .route("/api/file/{id}", get(get_file))
        .route("/api/stats", get(get_stats))
        .route("/api/handlers", get(list_handlers))
        .route("/api/handlers/reload", post(reload_handlers))
        .route("/api/config", get(get_config))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(address: Option<SocketAddr>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = Config::load().map_err(|e| format!("Failed to load config: {}", e))?;
    let address = address.unwrap_or(config.server.bind_addr);

    let engine: Option<Arc<dyn EngineClient>> = if config.engine.enabled {
        info!(rpc_url = %config.engine.rpc_url, "Engine RPC configured");
        let client = Aria2Client::new(
            config.engine.rpc_url.clone(),
            config.engine.secret.clone(),
            Duration::from_millis(config.engine.timeout_ms),
        )
        .map_err(|e| format!("Failed to build engine client: {}", e))?;
        Some(Arc::new(client))
    } else {
        warn!("Engine disabled, running in handler-only mode");
        None
    };

    let registry = Arc::new(RwLock::new(HandlerRegistry::build(&config.handlers).await));
    let store = Arc::new(JobStore::new());
    let metrics = Arc::new(Metrics::new());

    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        registry.clone(),
        engine.clone(),
        config.downloads.dir.clone(),
        metrics.clone(),
    ));

    let reconciler = Reconciler::new(
        store.clone(),
        engine,
        registry,
        metrics.clone(),
        Duration::from_millis(config.reconciler.interval_ms),
    );
    let reconciler_task = reconciler.spawn();

    let state = AppState::new(Arc::new(config), coordinator, store, metrics);
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "downlink API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reconciler_task.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
