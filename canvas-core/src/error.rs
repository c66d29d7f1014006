//! Error types for canvas operations

use thiserror::Error;

use crate::AgentId;

/// Storage layer errors.
///
/// These never reach a client verbatim: the admission controller maps every
/// storage failure to a generic internal error and logs the detail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Read failed for {what}: {reason}")]
    ReadFailed { what: String, reason: String },

    #[error("Write failed for {what}: {reason}")]
    WriteFailed { what: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Corrupt record in {table}: {reason}")]
    Corrupt { table: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Agent directory errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Credential already registered")]
    DuplicateCredential,

    #[error("Agent not found")]
    NotFound,

    #[error("Agent {id} already exists")]
    DuplicateId { id: AgentId },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Grid query errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("Region covers {area} cells, maximum is {max}")]
    RegionTooLarge { area: u64, max: u64 },

    #[error("Region bounds are inverted")]
    InvertedRegion,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },
}

/// Master error type for all canvas errors.
#[derive(Debug, Clone, Error)]
pub enum CanvasError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for canvas operations.
pub type CanvasResult<T> = Result<T, CanvasError>;

// =============================================================================
// TESTS
// =============================================================================
