//! Request and response bodies for the REST API.
//!
//! Domain payloads (`Cell`, `AgentProfile`, `PlacementReceipt`,
//! `CellChange`, `Bounds`) come straight from `canvas-core`; this module only
//! holds the shapes that exist because of HTTP.

use canvas_core::{AgentId, AgentProfile, Bounds, Color, ColorInput, EpochMillis};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ============================================================================
// AGENTS
// ============================================================================

/// Request to register a new agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RegisterAgentRequest {
    /// Display name; sanitized server-side.
    pub name: String,
    /// Palette color in `#RRGGBB`; random when omitted.
    #[serde(default)]
    pub color: Option<String>,
}

/// Registration result. The only response that ever carries the credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RegisteredAgent {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: AgentId,
    pub name: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, example = "#00FF00"))]
    pub color: Color,
    pub created_at: EpochMillis,
    /// 64 hex characters. Store it; it cannot be recovered.
    pub credential: String,
}

/// Response for listing agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ListAgentsResponse {
    pub agents: Vec<AgentProfile>,
    pub total: usize,
}

/// The caller's own profile and cooldown state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentStatusResponse {
    pub agent: AgentProfile,
    /// `None` when the agent has never placed.
    pub next_eligible_at: Option<EpochMillis>,
    pub can_place_now: bool,
    pub wait_ms: EpochMillis,
}

// ============================================================================
// PIXELS
// ============================================================================

/// Placement body. Coordinates are accepted as raw JSON so that a
/// non-integer value is rejected as invalid coordinates rather than as a
/// malformed body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PlacePixelRequest {
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = i64))]
    pub x: JsonValue,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = i64))]
    pub y: JsonValue,
    /// Palette color; the agent's default when omitted or null.
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, example = "#FF0000"))]
    pub color: JsonValue,
}

impl PlacePixelRequest {
    /// Integer view of a coordinate, `None` for anything else.
    pub fn coordinate(value: &JsonValue) -> Option<i64> {
        value.as_i64()
    }

    pub fn color_input(&self) -> ColorInput {
        match &self.color {
            JsonValue::Null => ColorInput::Default,
            JsonValue::String(text) => ColorInput::Text(text.clone()),
            _ => ColorInput::NotText,
        }
    }
}

// ============================================================================
// CANVAS
// ============================================================================

/// Inclusive region query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams, utoipa::ToSchema))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct RegionQuery {
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl From<RegionQuery> for Bounds {
    fn from(q: RegionQuery) -> Self {
        Bounds {
            min_x: q.min_x,
            max_x: q.max_x,
            min_y: q.min_y,
            max_y: q.max_y,
        }
    }
}

/// Cells written inside a region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RegionResponse {
    pub bounds: Bounds,
    pub cells: Vec<canvas_core::Cell>,
    pub count: usize,
}

/// Canvas-wide statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CanvasStats {
    pub grid_size: u32,
    pub cooldown_ms: EpochMillis,
    pub cells_claimed: u64,
    /// Extent of written cells; `None` while the canvas is empty.
    pub bounds: Option<Bounds>,
    pub palette: Vec<String>,
    pub live_viewers: usize,
    pub agents: usize,
}

/// Query for the activity log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct ActivityQuery {
    /// Maximum entries, newest first (default 50).
    pub limit: Option<usize>,
}
