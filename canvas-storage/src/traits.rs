//! Storage capability traits.
//!
//! The admission controller depends only on these traits. Every backend
//! (PostgreSQL in the API crate, LMDB and in-memory here) implements both.

use async_trait::async_trait;
use canvas_core::{
    Admission, Agent, AgentId, AgentProfile, Bounds, Cell, Coord, Credential, DirectoryError,
    EpochMillis, StorageError,
};

// ============================================================================
// GRID STORE
// ============================================================================

/// Durable mapping from coordinate to current occupant.
#[async_trait]
pub trait GridStore: Send + Sync {
    /// Read one cell; `None` means unclaimed.
    async fn get(&self, coord: Coord) -> Result<Option<Cell>, StorageError>;

    /// Insert or replace the cell at `(cell.x, cell.y)`.
    ///
    /// Writes to distinct coordinates must not interfere. Concurrent writes
    /// to one coordinate may land in any order but each is atomic, and an
    /// existing cell is only replaced by one that
    /// [supersedes](canvas_core::Cell::supersedes) it.
    async fn put(&self, cell: &Cell) -> Result<(), StorageError>;

    /// Every written cell inside `bounds` (inclusive). Area limits are the
    /// caller's concern.
    async fn range(&self, bounds: Bounds) -> Result<Vec<Cell>, StorageError>;

    /// Number of written cells.
    async fn count(&self) -> Result<u64, StorageError>;

    /// Extent of all written cells, `None` when nothing has been written.
    async fn bounds(&self) -> Result<Option<Bounds>, StorageError>;

    /// Every written cell, for cache warm-up.
    async fn load_all(&self) -> Result<Vec<Cell>, StorageError>;

    /// Cheap liveness probe.
    async fn health(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

// ============================================================================
// AGENT DIRECTORY
// ============================================================================

/// Durable registry of agents and their cooldown bookkeeping.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Register a new agent.
    ///
    /// Fails with [`DirectoryError::DuplicateCredential`] when another agent
    /// already holds the same credential.
    async fn create(&self, agent: &Agent) -> Result<(), DirectoryError>;

    /// Resolve the agent holding `credential`.
    async fn find_by_credential(&self, credential: &Credential) -> Result<Agent, DirectoryError>;

    async fn find_by_id(&self, id: AgentId) -> Result<Agent, DirectoryError>;

    /// All agents, oldest first. The return type cannot carry credentials.
    async fn list(&self) -> Result<Vec<AgentProfile>, DirectoryError>;

    /// Atomically check the cooldown for `id` and, if it has elapsed, set
    /// `last_write_at = now`.
    ///
    /// Implementations must perform the read, comparison and update as one
    /// indivisible step per agent: a conditional update, a compare-and-swap,
    /// or a write transaction that serializes writers. Two concurrent calls
    /// for the same agent at the same `now` admit at most one.
    async fn try_admit(
        &self,
        id: AgentId,
        now: EpochMillis,
        cooldown_ms: EpochMillis,
    ) -> Result<Admission, DirectoryError>;

    /// Cheap liveness probe.
    async fn health(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
