//! Canvas API - REST/WebSocket API Layer
//!
//! HTTP surface of the shared canvas: agent registration, cooldown-gated
//! pixel placement, region and statistics reads, and a WebSocket observer
//! stream fed by the [`Broadcaster`]. Also hosts the PostgreSQL backend for
//! the storage traits defined in `canvas-storage`.

pub mod broadcaster;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod extractors;
pub mod macros;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod ws;

// Re-export commonly used types
pub use broadcaster::{Broadcaster, SubscribeError, Subscription};
pub use config::{ApiConfig, ObserverLimits, StorageBackend};
pub use db::{DbConfig, PgStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use events::ObserverEvent;
pub use openapi::ApiDoc;
pub use routes::create_api_router;
pub use services::{AgentRegistry, PlacementController};
pub use state::AppState;
pub use types::*;
