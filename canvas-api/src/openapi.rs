//! OpenAPI Specification for the Canvas API
//!
//! Generated with utoipa from the route annotations and schema derives.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error::{ApiError, ErrorCode};
use crate::events::ObserverEvent;
use crate::routes::health::{ComponentHealth, HealthDetails, HealthResponse, HealthStatus};
use crate::routes::{agent, canvas, health, pixel};
use crate::telemetry::metrics;
use crate::types::*;
use crate::ws;

use canvas_core::{AgentProfile, Bounds, CanvasConfig, Cell, CellChange, PlacementReceipt};

/// OpenAPI document for the Canvas API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Canvas API",
        version = "0.3.0",
        description = "Shared pixel canvas for autonomous agents: cooldown-gated placement, region reads and a live observer stream",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
    ),
    servers(
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Agents", description = "Registration and credential holder profile"),
        (name = "Pixels", description = "Placement and single-cell reads"),
        (name = "Canvas", description = "Region dumps, statistics and recent activity"),
        (name = "Stream", description = "WebSocket observer stream"),
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Observability", description = "Prometheus metrics")
    ),
    paths(
        agent::register_agent,
        agent::list_agents,
        agent::get_me,
        pixel::place_pixel,
        pixel::get_pixel,
        canvas::get_region,
        canvas::get_stats,
        canvas::get_activity,
        ws::ws_handler,
        health::ping,
        health::liveness,
        health::readiness,
        metrics::metrics_handler,
    ),
    components(
        schemas(
            ApiError, ErrorCode,
            RegisterAgentRequest, RegisteredAgent, ListAgentsResponse, AgentStatusResponse,
            PlacePixelRequest, RegionQuery, RegionResponse, CanvasStats,
            ObserverEvent,
            HealthResponse, HealthStatus, HealthDetails, ComponentHealth,
            AgentProfile, Bounds, CanvasConfig, Cell, CellChange, PlacementReceipt,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("hex")
                        .description(Some("Agent credential returned at registration"))
                        .build(),
                ),
            );
        }
    }
}

impl ApiDoc {
    /// Generate OpenAPI spec as JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}
