//! Canvas REST API Routes
//!
//! Bulk reads served from the grid cache, plus the best-effort activity log.

use axum::{extract::State, routing::get, Json, Router};
use canvas_core::{palette_hex, Bounds, CellChange, PlacementRejection};
use std::sync::Arc;

use crate::{
    broadcaster::Broadcaster,
    error::{ApiError, ApiResult},
    extractors::ApiQuery,
    state::AppState,
    telemetry::metrics::with_metrics,
    types::{ActivityQuery, CanvasStats, RegionQuery, RegionResponse},
};

/// Default number of activity entries returned.
const DEFAULT_ACTIVITY_LIMIT: usize = 50;

/// GET /api/v1/canvas/region - Dump the written cells of a region
#[utoipa::path(
    get,
    path = "/api/v1/canvas/region",
    tag = "Canvas",
    params(RegionQuery),
    responses(
        (status = 200, description = "Written cells inside the region, row-major", body = RegionResponse),
        (status = 400, description = "Inverted, oversized or off-grid region", body = ApiError),
    ),
)]
pub async fn get_region(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RegionQuery>,
) -> ApiResult<Json<RegionResponse>> {
    let bounds = Bounds::from(query);
    if !bounds.within_grid(state.canvas.grid_size) {
        return Err(PlacementRejection::InvalidCoordinates {
            min: 0,
            max: state.canvas.max_coord(),
        }
        .into());
    }
    let cells = state.grid.range(bounds).await?;
    let count = cells.len();
    Ok(Json(RegionResponse {
        bounds,
        cells,
        count,
    }))
}

/// GET /api/v1/canvas/stats - Canvas-wide statistics
#[utoipa::path(
    get,
    path = "/api/v1/canvas/stats",
    tag = "Canvas",
    responses(
        (status = 200, description = "Current canvas statistics", body = CanvasStats),
        (status = 500, description = "Internal server error", body = ApiError),
    ),
)]
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<CanvasStats>> {
    let cells_claimed = state.grid.count().await?;
    let bounds = state.grid.bounds().await?;
    let agents = state.registry.list().await?.len();
    let live_viewers = state.broadcaster.count();

    with_metrics(|m| {
        m.set_cells_claimed(cells_claimed);
        m.set_observers(live_viewers);
    });

    Ok(Json(CanvasStats {
        grid_size: state.canvas.grid_size,
        cooldown_ms: state.canvas.cooldown_ms,
        cells_claimed,
        bounds,
        palette: palette_hex(),
        live_viewers,
        agents,
    }))
}

/// GET /api/v1/canvas/activity - Recent cell changes, newest first
#[utoipa::path(
    get,
    path = "/api/v1/canvas/activity",
    tag = "Canvas",
    params(ActivityQuery),
    responses(
        (status = 200, description = "Recent changes seen by this process", body = Vec<CellChange>),
    ),
)]
pub async fn get_activity(
    State(broadcaster): State<Arc<Broadcaster>>,
    ApiQuery(query): ApiQuery<ActivityQuery>,
) -> Json<Vec<CellChange>> {
    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT);
    Json(broadcaster.recent_activity(limit))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/region", get(get_region))
        .route("/stats", get(get_stats))
        .route("/activity", get(get_activity))
}
