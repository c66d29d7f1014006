//! Canvas rules configuration

use serde::{Deserialize, Serialize};

use crate::{CanvasError, CanvasResult, ConfigError, EpochMillis};

/// Default grid side length.
pub const DEFAULT_GRID_SIZE: u32 = 1000;

/// Default per-agent cooldown (five minutes).
pub const DEFAULT_COOLDOWN_MS: EpochMillis = 300_000;

/// Default cap on region query area (10,000 x 10,000).
pub const DEFAULT_MAX_REGION_AREA: u64 = 100_000_000;

/// Rules every placement is judged against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CanvasConfig {
    /// Side length N of the square grid; valid coordinates are `[0, N-1]`.
    pub grid_size: u32,
    /// Minimum time between two admitted placements by one agent.
    pub cooldown_ms: EpochMillis,
    /// Largest area a single region query may cover.
    pub max_region_area: u64,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            max_region_area: DEFAULT_MAX_REGION_AREA,
        }
    }
}

impl CanvasConfig {
    /// Create CanvasConfig from environment variables.
    ///
    /// Environment variables:
    /// - `CANVAS_GRID_SIZE`: grid side length (default: 1000)
    /// - `CANVAS_COOLDOWN_MS`: cooldown in milliseconds (default: 300000)
    /// - `CANVAS_MAX_REGION_AREA`: region query cap (default: 100000000)
    ///
    /// Unparseable values fall back to defaults. Call [`validate`](Self::validate)
    /// before use.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            grid_size: lookup("CANVAS_GRID_SIZE")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.grid_size),
            cooldown_ms: lookup("CANVAS_COOLDOWN_MS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.cooldown_ms),
            max_region_area: lookup("CANVAS_MAX_REGION_AREA")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.max_region_area),
        }
    }

    /// Largest valid coordinate on either axis.
    pub fn max_coord(&self) -> u32 {
        self.grid_size.saturating_sub(1)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - grid_size > 0
    /// - cooldown_ms > 0
    /// - max_region_area > 0
    pub fn validate(&self) -> CanvasResult<()> {
        if self.grid_size == 0 {
            return Err(invalid("grid_size", self.grid_size, "grid_size must be greater than 0"));
        }
        if self.cooldown_ms <= 0 {
            return Err(invalid(
                "cooldown_ms",
                self.cooldown_ms,
                "cooldown_ms must be greater than 0",
            ));
        }
        if self.max_region_area == 0 {
            return Err(invalid(
                "max_region_area",
                self.max_region_area,
                "max_region_area must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> CanvasError {
    CanvasError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}
