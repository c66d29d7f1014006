//! Pixel REST API Routes
//!
//! `POST /pixels` hands the request to the [`PlacementController`]; the
//! HTTP layer only translates JSON into a [`PlacementRequest`] and the
//! outcome back into a response.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use canvas_core::{checked_coord, CanvasConfig, Cell, PlacementReceipt, PlacementRejection, PlacementRequest};
use canvas_storage::GridCache;
use std::sync::Arc;

use crate::{
    error::{ApiError, ApiResult},
    extractors::{ApiJson, ApiPath, BearerCredential},
    services::PlacementController,
    state::AppState,
    types::PlacePixelRequest,
};

/// POST /api/v1/pixels - Place one pixel
#[utoipa::path(
    post,
    path = "/api/v1/pixels",
    tag = "Pixels",
    request_body = PlacePixelRequest,
    responses(
        (status = 201, description = "Pixel placed", body = PlacementReceipt),
        (status = 400, description = "Invalid coordinates, color or body", body = ApiError),
        (status = 401, description = "Missing or unknown credential", body = ApiError),
        (status = 429, description = "Agent is cooling down", body = ApiError),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn place_pixel(
    State(controller): State<Arc<PlacementController>>,
    BearerCredential(credential): BearerCredential,
    ApiJson(req): ApiJson<PlacePixelRequest>,
) -> ApiResult<impl IntoResponse> {
    let request = PlacementRequest {
        credential,
        x: PlacePixelRequest::coordinate(&req.x),
        y: PlacePixelRequest::coordinate(&req.y),
        color: req.color_input(),
    };
    let receipt = controller.place_detached(request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /api/v1/pixels/{x}/{y} - Read one cell
#[utoipa::path(
    get,
    path = "/api/v1/pixels/{x}/{y}",
    tag = "Pixels",
    params(
        ("x" = i64, Path, description = "Column"),
        ("y" = i64, Path, description = "Row"),
    ),
    responses(
        (status = 200, description = "Current occupant", body = Cell),
        (status = 400, description = "Coordinates outside the grid", body = ApiError),
        (status = 404, description = "Cell never written", body = ApiError),
    ),
)]
pub async fn get_pixel(
    State(grid): State<Arc<GridCache>>,
    State(canvas): State<CanvasConfig>,
    ApiPath((x, y)): ApiPath<(i64, i64)>,
) -> ApiResult<Json<Cell>> {
    let coord = checked_coord(x, y, canvas.grid_size).ok_or(PlacementRejection::InvalidCoordinates {
        min: 0,
        max: canvas.max_coord(),
    })?;

    grid.get(coord)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("cell ({}, {}) has never been written", x, y)))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", post(place_pixel))
        .route("/:x/:y", get(get_pixel))
}
