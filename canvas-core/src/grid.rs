//! Grid geometry and cell values.

use serde::{Deserialize, Serialize};

use crate::{AgentId, Color, EpochMillis};

/// A validated cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Coord {
    pub x: u32,
    pub y: u32,
}

impl Coord {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// The current occupant of one grid location.
///
/// A coordinate without a `Cell` is unclaimed. Cells are overwritten in
/// place on every successful placement and never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Cell {
    pub x: u32,
    pub y: u32,
    #[cfg_attr(feature = "openapi", schema(value_type = String, example = "#FF0000"))]
    pub color: Color,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub writer_id: AgentId,
    pub written_at: EpochMillis,
}

impl Cell {
    pub fn coord(&self) -> Coord {
        Coord::new(self.x, self.y)
    }

    /// Whether this write wins over `other` at the same coordinate.
    ///
    /// Writes are ordered by `written_at`, ties broken by writer id, so every
    /// store and the cache settle on the same occupant regardless of the
    /// order in which commits land.
    pub fn supersedes(&self, other: &Cell) -> bool {
        (self.written_at, self.writer_id) >= (other.written_at, other.writer_id)
    }
}

/// Inclusive rectangle over the grid.
///
/// Used both for the extent of all written cells and for region queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Bounds {
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl Bounds {
    /// Degenerate bounds covering a single coordinate.
    pub fn point(coord: Coord) -> Self {
        Self {
            min_x: coord.x,
            max_x: coord.x,
            min_y: coord.y,
            max_y: coord.y,
        }
    }

    /// Grow to include `coord`.
    pub fn include(&mut self, coord: Coord) {
        self.min_x = self.min_x.min(coord.x);
        self.max_x = self.max_x.max(coord.x);
        self.min_y = self.min_y.min(coord.y);
        self.max_y = self.max_y.max(coord.y);
    }

    pub fn contains(&self, coord: Coord) -> bool {
        (self.min_x..=self.max_x).contains(&coord.x) && (self.min_y..=self.max_y).contains(&coord.y)
    }

    /// Number of coordinates covered, or `None` for inverted bounds.
    ///
    /// Saturates at `u64::MAX`: the full `u32` square has 2^64 coordinates.
    pub fn area(&self) -> Option<u64> {
        if self.min_x > self.max_x || self.min_y > self.max_y {
            return None;
        }
        let width = u64::from(self.max_x - self.min_x) + 1;
        let height = u64::from(self.max_y - self.min_y) + 1;
        Some(width.checked_mul(height).unwrap_or(u64::MAX))
    }

    /// True when every corner lies inside a square grid of side `size`.
    pub fn within_grid(&self, size: u32) -> bool {
        self.max_x < size && self.max_y < size
    }

    /// Smallest bounds covering every cell, or `None` when empty.
    pub fn enclosing<'a>(cells: impl IntoIterator<Item = &'a Cell>) -> Option<Self> {
        let mut iter = cells.into_iter();
        let first = iter.next()?;
        let mut bounds = Self::point(first.coord());
        for cell in iter {
            bounds.include(cell.coord());
        }
        Some(bounds)
    }
}

/// Validate raw coordinates against a square grid of side `size`.
///
/// Returns `None` when either axis falls outside `[0, size - 1]`.
pub fn checked_coord(x: i64, y: i64, size: u32) -> Option<Coord> {
    let in_range = |v: i64| v >= 0 && v < i64::from(size);
    if in_range(x) && in_range(y) {
        Some(Coord::new(x as u32, y as u32))
    } else {
        None
    }
}
