//! Canvas Core - Entity Types
//!
//! Data structures and pure rules shared by every other crate: identities,
//! the palette, credentials, grid geometry, agent records, placement
//! outcomes, errors and the canvas rules configuration. No I/O lives here.

mod agent;
mod config;
mod credential;
mod error;
mod grid;
mod identity;
mod palette;
mod placement;

pub use agent::{sanitize_name, Agent, AgentProfile, InvalidName, MAX_NAME_CHARS};
pub use config::{CanvasConfig, DEFAULT_COOLDOWN_MS, DEFAULT_GRID_SIZE, DEFAULT_MAX_REGION_AREA};
pub use credential::{Credential, MalformedCredential, CREDENTIAL_BYTES, CREDENTIAL_HEX_LEN};
pub use error::{CanvasError, CanvasResult, ConfigError, DirectoryError, GridError, StorageError};
pub use grid::{checked_coord, Bounds, Cell, Coord};
pub use identity::{new_agent_id, AgentId, Clock, EpochMillis, ManualClock, SystemClock};
pub use palette::{palette_hex, Color, UnknownColor, PALETTE};
pub use placement::{
    cooldown_elapsed, remaining_wait, Admission, CellChange, ColorInput, PlacementReceipt,
    PlacementRejection, PlacementRequest, PlacementResult,
};
