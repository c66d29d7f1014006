//! Placement requests, outcomes, and the cooldown rule.
//!
//! The admission controller itself lives in the API crate because it wires
//! storage, cache and broadcaster together; everything here is pure data
//! plus the arithmetic every backend must agree on.

use serde::{Deserialize, Serialize};

use crate::{palette_hex, AgentId, Color, EpochMillis};

// =============================================================================
// REQUEST
// =============================================================================

/// An ephemeral placement request, exactly as presented by the caller.
///
/// Nothing here is validated yet. A coordinate the caller supplied as
/// something other than an integer is carried as `None` so that it is
/// rejected in the coordinate stage, after the credential stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementRequest {
    pub credential: String,
    pub x: Option<i64>,
    pub y: Option<i64>,
    pub color: ColorInput,
}

impl PlacementRequest {
    pub fn new(credential: impl Into<String>, x: i64, y: i64, color: Option<&str>) -> Self {
        Self {
            credential: credential.into(),
            x: Some(x),
            y: Some(y),
            color: color.into(),
        }
    }
}

/// The color field of a request, before palette validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ColorInput {
    /// Omitted or null. The agent's default color is used.
    #[default]
    Default,
    Text(String),
    /// Present but not a string. Rejected in the color stage.
    NotText,
}

impl From<Option<&str>> for ColorInput {
    fn from(color: Option<&str>) -> Self {
        match color {
            Some(text) => ColorInput::Text(text.to_string()),
            None => ColorInput::Default,
        }
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Successful placement details returned to the writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PlacementReceipt {
    pub x: u32,
    pub y: u32,
    #[cfg_attr(feature = "openapi", schema(value_type = String, example = "#FF0000"))]
    pub color: Color,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub writer_id: AgentId,
    pub writer_name: String,
    pub was_override: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub previous_writer_id: Option<AgentId>,
    pub placed_at: EpochMillis,
    pub next_eligible_at: EpochMillis,
}

/// Why a placement was refused.
///
/// Each variant carries enough structure for an autonomous client to
/// correct itself without parsing prose.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementRejection {
    #[error("credential is malformed or unknown")]
    InvalidCredential,

    #[error("coordinates must be integers in [{min}, {max}]")]
    InvalidCoordinates { min: u32, max: u32 },

    #[error("color is not in the palette")]
    InvalidColor { palette: Vec<String> },

    #[error("cooldown active, retry in {wait_ms}ms")]
    RateLimited {
        wait_ms: EpochMillis,
        next_eligible_at: EpochMillis,
    },

    #[error("internal error")]
    InternalError,
}

impl PlacementRejection {
    pub fn invalid_color() -> Self {
        Self::InvalidColor {
            palette: palette_hex(),
        }
    }

    /// Short stable label, used for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidCredential => "invalid_credential",
            Self::InvalidCoordinates { .. } => "invalid_coordinates",
            Self::InvalidColor { .. } => "invalid_color",
            Self::RateLimited { .. } => "rate_limited",
            Self::InternalError => "internal_error",
        }
    }
}

/// Result of one placement attempt.
pub type PlacementResult = Result<PlacementReceipt, PlacementRejection>;

// =============================================================================
// OBSERVER EVENT PAYLOAD
// =============================================================================

/// A committed cell change as pushed to observers.
///
/// `live_viewer_count` is stamped by the broadcaster at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CellChange {
    pub x: u32,
    pub y: u32,
    #[cfg_attr(feature = "openapi", schema(value_type = String, example = "#0000FF"))]
    pub color: Color,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub writer_id: AgentId,
    pub writer_name: String,
    pub was_override: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub previous_writer_id: Option<AgentId>,
    pub timestamp: EpochMillis,
    pub live_viewer_count: usize,
}

impl From<&PlacementReceipt> for CellChange {
    fn from(receipt: &PlacementReceipt) -> Self {
        Self {
            x: receipt.x,
            y: receipt.y,
            color: receipt.color,
            writer_id: receipt.writer_id,
            writer_name: receipt.writer_name.clone(),
            was_override: receipt.was_override,
            previous_writer_id: receipt.previous_writer_id,
            timestamp: receipt.placed_at,
            live_viewer_count: 0,
        }
    }
}

// =============================================================================
// COOLDOWN RULE
// =============================================================================

/// Outcome of the atomic check-and-update on an agent's `last_write_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// `last_write_at` now equals the admission instant.
    Admitted,
    /// The cooldown has not elapsed; `last_write_at` is unchanged.
    CoolingDown { last_write_at: EpochMillis },
    /// No agent with that id exists.
    UnknownAgent,
}

/// Whether an agent whose last admitted write was `last_write_at` may write
/// at `now`.
///
/// Eligible once `now - last_write_at >= cooldown_ms`. An agent that has
/// never written is always eligible.
pub fn cooldown_elapsed(
    last_write_at: Option<EpochMillis>,
    now: EpochMillis,
    cooldown_ms: EpochMillis,
) -> bool {
    match last_write_at {
        None => true,
        Some(last) => now.saturating_sub(last) >= cooldown_ms,
    }
}

/// Remaining wait in milliseconds, never negative.
pub fn remaining_wait(last_write_at: EpochMillis, now: EpochMillis, cooldown_ms: EpochMillis) -> EpochMillis {
    last_write_at
        .saturating_add(cooldown_ms)
        .saturating_sub(now)
        .max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cooldown_timeline() {
        let cooldown = 10_000;
        assert!(cooldown_elapsed(None, 0, cooldown));
        assert!(!cooldown_elapsed(Some(0), 4_000, cooldown));
        assert_eq!(remaining_wait(0, 4_000, cooldown), 6_000);
        assert!(cooldown_elapsed(Some(0), 10_000, cooldown));
        assert!(cooldown_elapsed(Some(0), 10_001, cooldown));
    }

    #[test]
    fn test_clock_moving_backwards_keeps_agent_cooling() {
        assert!(!cooldown_elapsed(Some(5_000), 4_000, 100));
        assert_eq!(remaining_wait(5_000, 4_000, 100), 1_100);
    }

    #[test]
    fn test_rejection_reasons_are_distinct() {
        let all = [
            PlacementRejection::InvalidCredential,
            PlacementRejection::InvalidCoordinates { min: 0, max: 9 },
            PlacementRejection::invalid_color(),
            PlacementRejection::RateLimited {
                wait_ms: 1,
                next_eligible_at: 2,
            },
            PlacementRejection::InternalError,
        ];
        let reasons: std::collections::HashSet<_> = all.iter().map(|r| r.reason()).collect();
        assert_eq!(reasons.len(), all.len());
    }

    #[test]
    fn test_invalid_color_lists_palette() {
        match PlacementRejection::invalid_color() {
            PlacementRejection::InvalidColor { palette } => {
                assert_eq!(palette.len(), crate::PALETTE.len());
                assert!(palette.contains(&"#FF0000".to_string()));
            }
            other => panic!("unexpected rejection: {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn prop_wait_and_eligibility_agree(last in 0i64..1_000_000, elapsed in 0i64..2_000_000, cooldown in 1i64..500_000) {
            let now = last + elapsed;
            let eligible = cooldown_elapsed(Some(last), now, cooldown);
            let wait = remaining_wait(last, now, cooldown);
            prop_assert_eq!(eligible, wait == 0);
            prop_assert!(wait <= cooldown);
        }
    }
}
