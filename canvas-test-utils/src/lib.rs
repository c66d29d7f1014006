//! Canvas Test Utilities
//!
//! Shared test infrastructure for the canvas workspace:
//! - Proptest generators for coordinates, colors, names and cells
//! - Fixtures for agents, configurations and in-memory backends
//! - Assertions over placement outcomes

pub use canvas_storage::{InMemoryAgentDirectory, InMemoryGridStore};

pub use canvas_core::{
    palette_hex, Admission, Agent, AgentId, AgentProfile, Bounds, CanvasConfig, Cell, Clock, Color,
    Coord, Credential, EpochMillis, ManualClock, PlacementReceipt, PlacementRejection,
    PlacementRequest, PlacementResult, PALETTE,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for canvas types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a random AgentId.
    pub fn arb_agent_id() -> impl Strategy<Value = AgentId> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Timestamps between 2020 and 2030, in epoch milliseconds.
    pub fn arb_epoch_millis() -> impl Strategy<Value = EpochMillis> {
        1_577_836_800_000i64..1_893_456_000_000i64
    }

    /// Any palette member.
    pub fn arb_palette_color() -> impl Strategy<Value = Color> {
        proptest::sample::select(PALETTE.to_vec())
    }

    /// A palette color spelled the way a client might: any letter case,
    /// with or without the leading `#`.
    pub fn arb_palette_spelling() -> impl Strategy<Value = (Color, String)> {
        (arb_palette_color(), any::<bool>(), any::<bool>()).prop_map(|(color, lower, hash)| {
            let hex = color.to_hex();
            let hex = if lower { hex.to_lowercase() } else { hex };
            let spelled = if hash {
                hex
            } else {
                hex.trim_start_matches('#').to_string()
            };
            (color, spelled)
        })
    }

    /// A `#RRGGBB` string that is not in the palette.
    pub fn arb_off_palette_hex() -> impl Strategy<Value = String> {
        any::<u32>()
            .prop_map(|v| v & 0x00FF_FFFF)
            .prop_filter("must not be a palette color", |v| {
                !PALETTE.iter().any(|c| c.rgb() == *v)
            })
            .prop_map(|v| format!("#{:06X}", v))
    }

    /// In-bounds coordinates for a grid of side `size` (`size > 0`).
    pub fn arb_coord(size: u32) -> impl Strategy<Value = (i64, i64)> {
        let max = i64::from(size);
        (0..max, 0..max)
    }

    /// Coordinates with at least one axis outside `[0, size - 1]`.
    pub fn arb_out_of_bounds_coord(size: u32) -> impl Strategy<Value = (i64, i64)> {
        let max = i64::from(size);
        let outside = prop_oneof![i64::MIN..0, max..i64::MAX].boxed();
        prop_oneof![
            (outside.clone(), 0..max),
            (0..max, outside.clone()),
            (outside.clone(), outside),
        ]
    }

    /// Display names that survive sanitization.
    pub fn arb_agent_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9 _-]{0,30}"
    }

    /// A written cell inside a grid of side `size`.
    pub fn arb_cell(size: u32) -> impl Strategy<Value = Cell> {
        (0..size, 0..size, arb_palette_color(), arb_agent_id(), arb_epoch_millis()).prop_map(
            |(x, y, color, writer_id, written_at)| Cell {
                x,
                y,
                color,
                writer_id,
                written_at,
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use std::sync::Arc;

    /// Canvas rules with the given grid size and cooldown.
    pub fn canvas_config(grid_size: u32, cooldown_ms: EpochMillis) -> CanvasConfig {
        CanvasConfig {
            grid_size,
            cooldown_ms,
            ..CanvasConfig::default()
        }
    }

    /// The 1000-cell grid with a ten-second cooldown used by most scenarios.
    pub fn small_canvas() -> CanvasConfig {
        canvas_config(1000, 10_000)
    }

    /// A fresh agent that has never placed.
    pub fn agent(name: &str, color: Color, created_at: EpochMillis) -> Agent {
        Agent {
            id: canvas_core::new_agent_id(),
            name: name.to_string(),
            credential: Credential::generate(),
            color,
            created_at,
            last_write_at: None,
        }
    }

    /// A palette color by canonical hex. Panics on a typo in the test.
    #[track_caller]
    pub fn color(hex: &str) -> Color {
        match Color::parse(hex) {
            Ok(color) => color,
            Err(e) => panic!("fixture color {}: {}", hex, e),
        }
    }

    /// Empty in-memory grid store and agent directory.
    pub fn memory_backends() -> (Arc<InMemoryGridStore>, Arc<InMemoryAgentDirectory>) {
        (
            Arc::new(InMemoryGridStore::new()),
            Arc::new(InMemoryAgentDirectory::new()),
        )
    }

    /// A clock frozen at `start` until advanced.
    pub fn manual_clock(start: EpochMillis) -> ManualClock {
        ManualClock::new(start)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over placement outcomes.

    use super::*;

    /// Assert the placement succeeded and return its receipt.
    #[track_caller]
    pub fn assert_placed(result: PlacementResult) -> PlacementReceipt {
        match result {
            Ok(receipt) => receipt,
            Err(rejection) => panic!("Expected placement, got rejection: {:?}", rejection),
        }
    }

    /// Assert the placement was rejected for `reason`
    /// (see [`PlacementRejection::reason`]).
    #[track_caller]
    pub fn assert_rejected(result: &PlacementResult, reason: &str) {
        match result {
            Err(rejection) => assert_eq!(rejection.reason(), reason, "wrong rejection"),
            Ok(receipt) => panic!("Expected {} rejection, got receipt: {:?}", reason, receipt),
        }
    }

    /// Assert a cooldown rejection with the exact wait and eligibility time.
    #[track_caller]
    pub fn assert_rate_limited(
        result: &PlacementResult,
        wait_ms: EpochMillis,
        next_eligible_at: EpochMillis,
    ) {
        match result {
            Err(PlacementRejection::RateLimited {
                wait_ms: w,
                next_eligible_at: n,
            }) => {
                assert_eq!(*w, wait_ms, "wrong wait_ms");
                assert_eq!(*n, next_eligible_at, "wrong next_eligible_at");
            }
            other => panic!("Expected RateLimited, got: {:?}", other),
        }
    }
}
