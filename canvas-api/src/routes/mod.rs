//! REST API Routes Module
//!
//! Route handlers grouped by resource, plus the router assembly that puts
//! the perimeter (CORS, body limit, per-IP rate limit) in front of them.

pub mod agent;
pub mod canvas;
pub mod health;
pub mod pixel;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, header::HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{rate_limit_middleware, RateLimitState};
use crate::openapi::ApiDoc;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};
use crate::ws::ws_handler;

pub use agent::create_router as agent_router;
pub use canvas::create_router as canvas_router;
pub use health::create_router as health_router;
pub use pixel::create_router as pixel_router;

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

fn is_production_environment() -> bool {
    std::env::var("CANVAS_ENVIRONMENT")
        .map(|e| matches!(e.to_lowercase().as_str(), "production" | "prod"))
        .unwrap_or(false)
}

fn validate_api_config_for_production(config: &ApiConfig) -> ApiResult<()> {
    if config.cors_origins.is_empty() {
        return Err(ApiError::invalid_input(
            "CORS origins not configured for production. Set CANVAS_CORS_ORIGINS.",
        ));
    }
    if !config.rate_limit_enabled {
        tracing::warn!(
            "Rate limiting is disabled in production - this is not recommended.\n\
             Set CANVAS_RATE_LIMIT_ENABLED=true to enable rate limiting."
        );
    }
    Ok(())
}

fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("retry-after"),
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

/// Routes under `/api/v1`, without the perimeter layers.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/agents", agent::create_router())
        .nest("/pixels", pixel::create_router())
        .nest("/canvas", canvas::create_router())
        .route("/stream", get(ws_handler))
}

/// Build the complete application router.
pub fn create_api_router(state: AppState, config: &ApiConfig) -> ApiResult<Router> {
    if is_production_environment() {
        validate_api_config_for_production(config)?;
    }

    let rate_limit_state = RateLimitState::new(Arc::new(config.clone()));
    let cors = build_cors_layer(config);

    Ok(Router::new()
        .nest("/api/v1", api_routes())
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .route("/openapi.json", get(openapi_json))
        .with_state(state)
        .layer(Extension(config.client_ip_source()))
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(from_fn_with_state(rate_limit_state, rate_limit_middleware))
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors))
}
