// api-gateway/src/main.rs

//! API gateway binary.
//!
//! This binary exposes a small HTTP API on top of the `roadpack` crate:
//!
//! - `GET /health`
//! - `POST /upload`, `GET /ipfs/{cid}`
//! - `POST /packs`, `GET /packs`
//! - `POST /packs/{cid}/verify`
//!
//! Blobs and index entries live in RocksDB (or in memory with
//! `ROADPACK_GATEWAY_BACKEND=memory`), and a Prometheus exporter serves
//! `/metrics`.

mod config;
mod routes;
mod state;

use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use config::{ApiConfig, Backend};
use roadpack::{
    BlobStore, InMemoryStore, MetadataIndex, MetricsRegistry, RoadpackConfig, RocksDbStore,
    run_prometheus_http_server,
};
use state::{AppState, SharedState};

#[tokio::main]
async fn main() {
    // Basic tracing setup.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("api_gateway=info,roadpack=info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let api_cfg = ApiConfig::from_env();
    let core_cfg = RoadpackConfig::from_env();

    // ---------------------------
    // Metrics
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new()
            .map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );

    if core_cfg.metrics.enabled {
        let metrics_clone = metrics.clone();
        let addr = core_cfg.metrics.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(metrics_clone, addr).await {
                tracing::error!("metrics HTTP server error: {e}");
            }
        });
        tracing::info!("metrics exporter listening on http://{}/metrics", addr);
    }

    // ---------------------------
    // Storage
    // ---------------------------

    let (blobs, index): (Arc<dyn BlobStore>, Arc<dyn MetadataIndex>) = match api_cfg.backend {
        Backend::RocksDb => {
            let store = Arc::new(RocksDbStore::open(&core_cfg.storage).map_err(|e| {
                format!(
                    "failed to open RocksDB store at {}: {e}",
                    core_cfg.storage.path
                )
            })?);
            let blobs: Arc<dyn BlobStore> = store.clone();
            let index: Arc<dyn MetadataIndex> = store;
            (blobs, index)
        }
        Backend::Memory => {
            tracing::warn!("using in-memory storage; published packs are lost on restart");
            let store = Arc::new(InMemoryStore::new());
            let blobs: Arc<dyn BlobStore> = store.clone();
            let index: Arc<dyn MetadataIndex> = store;
            (blobs, index)
        }
    };

    let app_state: SharedState = Arc::new(AppState {
        blobs,
        index,
        metrics,
        verify: core_cfg.verify.clone(),
        upload_token: api_cfg.upload_token.clone(),
    });

    // ---------------------------
    // HTTP router
    // ---------------------------

    let app = routes::router(app_state, api_cfg.max_upload_bytes);

    tracing::info!("API gateway listening on http://{}", api_cfg.listen_addr);

    let listener = tokio::net::TcpListener::bind(api_cfg.listen_addr)
        .await
        .map_err(|e| format!("failed to bind {}: {e}", api_cfg.listen_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("API server error: {e}"))?;

    Ok(())
}

/// Waits for Ctrl-C and returns, used for graceful shutdown.
async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
