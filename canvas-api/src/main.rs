//! Canvas API Server Entry Point
//!
//! Bootstraps configuration, opens the selected storage backend, warms the
//! grid cache and starts the Axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use canvas_api::telemetry::{init_tracing, LogFormat};
use canvas_api::{
    create_api_router, ApiConfig, ApiError, ApiResult, AppState, DbConfig, ObserverLimits,
    PgStore, StorageBackend,
};
use canvas_core::{CanvasConfig, SystemClock};
use canvas_storage::{
    AgentDirectory, GridStore, InMemoryAgentDirectory, InMemoryGridStore, LmdbStore,
};

/// Time observers get to receive the final `Closed` event on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(LogFormat::from_env())?;

    let canvas = CanvasConfig::from_env();
    canvas.validate()?;

    let backend = StorageBackend::from_env();
    let (store, directory) = open_backend(&backend).await?;
    tracing::info!(
        backend = backend.name(),
        grid_size = canvas.grid_size,
        cooldown_ms = canvas.cooldown_ms,
        "storage ready"
    );

    let api_config = ApiConfig::from_env();
    let limits = ObserverLimits::from_env();
    let state = AppState::new(store, directory, Arc::new(SystemClock), canvas, limits);

    // A failed warm-up is retried by the first reader.
    match state.grid.ensure_loaded().await {
        Ok(()) => tracing::info!("grid cache loaded"),
        Err(e) => tracing::warn!(error = %e, "grid cache warm-up failed"),
    }

    let broadcaster = Arc::clone(&state.broadcaster);
    let maintenance = broadcaster.spawn_maintenance();

    let app: Router = create_api_router(state, &api_config)?;

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting canvas API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    broadcaster.shutdown();
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    maintenance.abort();
    Ok(())
}

async fn open_backend(
    backend: &StorageBackend,
) -> ApiResult<(Arc<dyn GridStore>, Arc<dyn AgentDirectory>)> {
    match backend {
        StorageBackend::Memory => {
            let grid: Arc<dyn GridStore> = Arc::new(InMemoryGridStore::new());
            let directory: Arc<dyn AgentDirectory> = Arc::new(InMemoryAgentDirectory::new());
            Ok((grid, directory))
        }
        StorageBackend::Lmdb { path, max_size_mb } => {
            let store = Arc::new(LmdbStore::open(path, *max_size_mb).map_err(|e| {
                ApiError::internal_error(format!("Failed to open LMDB store: {}", e))
            })?);
            let grid: Arc<dyn GridStore> = store.clone();
            let directory: Arc<dyn AgentDirectory> = store;
            Ok((grid, directory))
        }
        StorageBackend::Postgres => {
            let store = Arc::new(PgStore::connect(&DbConfig::from_env()).await?);
            let grid: Arc<dyn GridStore> = store.clone();
            let directory: Arc<dyn AgentDirectory> = store;
            Ok((grid, directory))
        }
    }
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("CANVAS_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("CANVAS_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());
    let port = port_str.parse::<u16>().map_err(|_| {
        ApiError::invalid_input(format!("Invalid port value: {}", port_str))
    })?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>().map_err(|e| {
        ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e))
    })
}
