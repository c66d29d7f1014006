//! Agent REST API Routes
//!
//! Registration is open; `/agents/me` requires the bearer credential.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;

use crate::{
    error::{ApiError, ApiResult},
    extractors::{ApiJson, BearerCredential},
    services::AgentRegistry,
    state::AppState,
    types::{AgentStatusResponse, ListAgentsResponse, RegisterAgentRequest, RegisteredAgent},
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/agents - Register a new agent
#[utoipa::path(
    post,
    path = "/api/v1/agents",
    tag = "Agents",
    request_body = RegisterAgentRequest,
    responses(
        (status = 201, description = "Agent registered; the credential is only ever returned here", body = RegisteredAgent),
        (status = 400, description = "Invalid name or color", body = ApiError),
    ),
)]
pub async fn register_agent(
    State(registry): State<Arc<AgentRegistry>>,
    ApiJson(req): ApiJson<RegisterAgentRequest>,
) -> ApiResult<impl IntoResponse> {
    let agent = registry.register(req).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

/// GET /api/v1/agents - List all agents
#[utoipa::path(
    get,
    path = "/api/v1/agents",
    tag = "Agents",
    responses(
        (status = 200, description = "Registered agents, oldest first", body = ListAgentsResponse),
        (status = 500, description = "Internal server error", body = ApiError),
    ),
)]
pub async fn list_agents(
    State(registry): State<Arc<AgentRegistry>>,
) -> ApiResult<Json<ListAgentsResponse>> {
    let agents = registry.list().await?;
    let total = agents.len();
    Ok(Json(ListAgentsResponse { agents, total }))
}

/// GET /api/v1/agents/me - The caller's profile and cooldown state
#[utoipa::path(
    get,
    path = "/api/v1/agents/me",
    tag = "Agents",
    responses(
        (status = 200, description = "Profile of the credential holder", body = AgentStatusResponse),
        (status = 401, description = "Missing or unknown credential", body = ApiError),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn get_me(
    State(registry): State<Arc<AgentRegistry>>,
    BearerCredential(credential): BearerCredential,
) -> ApiResult<Json<AgentStatusResponse>> {
    Ok(Json(registry.status(&credential).await?))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_agents).post(register_agent))
        .route("/me", get(get_me))
}
