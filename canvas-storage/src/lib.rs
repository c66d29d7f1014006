//! Canvas Storage - Storage Traits and Backends
//!
//! Defines the storage abstraction for grid cells and agents, the
//! in-memory and LMDB implementations, and the process-local grid cache.
//! The PostgreSQL implementation lives in canvas-api next to its pool.

pub mod cache;
pub mod lmdb;
pub mod memory;
pub mod traits;

pub use cache::{CacheStatus, GridCache};
pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::{InMemoryAgentDirectory, InMemoryGridStore};
pub use traits::{AgentDirectory, GridStore};
