//! LMDB-backed grid store and agent directory.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a single-node durable
//! store with no external server. One environment holds three named
//! databases:
//!
//! - `cells`: 8-byte key (`x` then `y`, both big-endian) to JSON [`Cell`]
//! - `agents`: 16-byte agent id to JSON agent record
//! - `credentials`: credential hex to 16-byte agent id
//!
//! # Atomicity
//!
//! LMDB admits one write transaction at a time per environment. The cooldown
//! check in `try_admit` reads and updates the agent record inside a single
//! write transaction, so it cannot interleave with another admission.

use std::path::Path;

use async_trait::async_trait;
use canvas_core::{
    cooldown_elapsed, Admission, Agent, AgentId, AgentProfile, Bounds, Cell, Color, Coord,
    Credential, DirectoryError, EpochMillis, StorageError,
};
use heed::types::{Bytes, SerdeJson};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::traits::{AgentDirectory, GridStore};

/// Error type for opening the LMDB environment.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StorageError {
    fn from(e: LmdbStoreError) -> Self {
        StorageError::Unavailable {
            reason: e.to_string(),
        }
    }
}

fn txn_err(e: heed::Error) -> StorageError {
    StorageError::TransactionFailed {
        reason: e.to_string(),
    }
}

/// On-disk agent record. Unlike [`Agent`] this is serializable, so it never
/// leaves this module.
#[derive(Serialize, Deserialize)]
struct StoredAgent {
    id: AgentId,
    name: String,
    credential: String,
    color: Color,
    created_at: EpochMillis,
    last_write_at: Option<EpochMillis>,
}

impl StoredAgent {
    fn from_agent(agent: &Agent) -> Self {
        Self {
            id: agent.id,
            name: agent.name.clone(),
            credential: agent.credential.expose().to_string(),
            color: agent.color,
            created_at: agent.created_at,
            last_write_at: agent.last_write_at,
        }
    }

    fn into_agent(self) -> Result<Agent, StorageError> {
        let credential = Credential::parse(&self.credential).map_err(|e| StorageError::Corrupt {
            table: "agents".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Agent {
            id: self.id,
            name: self.name,
            credential,
            color: self.color,
            created_at: self.created_at,
            last_write_at: self.last_write_at,
        })
    }
}

fn cell_key(coord: Coord) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&coord.x.to_be_bytes());
    key[4..].copy_from_slice(&coord.y.to_be_bytes());
    key
}

/// Grid store and agent directory in one LMDB environment.
pub struct LmdbStore {
    env: Env,
    cells: Database<Bytes, SerdeJson<Cell>>,
    agents: Database<Bytes, SerdeJson<StoredAgent>>,
    credentials: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Open or create the store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the memory map in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(3)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let cells = env
            .create_database(&mut wtxn, Some("cells"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let agents = env
            .create_database(&mut wtxn, Some("agents"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let credentials = env
            .create_database(&mut wtxn, Some("credentials"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        tracing::info!(path = %path.as_ref().display(), max_size_mb, "LMDB store opened");

        Ok(Self {
            env,
            cells,
            agents,
            credentials,
        })
    }

    fn scan_cells(&self, mut keep: impl FnMut(&Cell) -> bool) -> Result<Vec<Cell>, StorageError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut out = Vec::new();
        for entry in self.cells.iter(&rtxn).map_err(txn_err)? {
            let (_, cell) = entry.map_err(txn_err)?;
            if keep(&cell) {
                out.push(cell);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl GridStore for LmdbStore {
    async fn get(&self, coord: Coord) -> Result<Option<Cell>, StorageError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.cells.get(&rtxn, &cell_key(coord)).map_err(txn_err)
    }

    async fn put(&self, cell: &Cell) -> Result<(), StorageError> {
        let key = cell_key(cell.coord());
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let current = self.cells.get(&wtxn, &key).map_err(txn_err)?;
        if current.is_some_and(|current| !cell.supersedes(&current)) {
            return Ok(());
        }
        self.cells.put(&mut wtxn, &key, cell).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    async fn range(&self, bounds: Bounds) -> Result<Vec<Cell>, StorageError> {
        let mut cells = self.scan_cells(|cell| bounds.contains(cell.coord()))?;
        cells.sort_by_key(|c| (c.y, c.x));
        Ok(cells)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.cells.len(&rtxn).map_err(txn_err)
    }

    async fn bounds(&self) -> Result<Option<Bounds>, StorageError> {
        let cells = self.scan_cells(|_| true)?;
        Ok(Bounds::enclosing(&cells))
    }

    async fn load_all(&self) -> Result<Vec<Cell>, StorageError> {
        self.scan_cells(|_| true)
    }

    async fn health(&self) -> Result<(), StorageError> {
        self.env.read_txn().map(|_| ()).map_err(txn_err)
    }
}

#[async_trait]
impl AgentDirectory for LmdbStore {
    async fn create(&self, agent: &Agent) -> Result<(), DirectoryError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let secret = agent.credential.expose().as_bytes();

        if self.credentials.get(&wtxn, secret).map_err(txn_err)?.is_some() {
            return Err(DirectoryError::DuplicateCredential);
        }
        if self
            .agents
            .get(&wtxn, agent.id.as_bytes())
            .map_err(txn_err)?
            .is_some()
        {
            return Err(DirectoryError::DuplicateId { id: agent.id });
        }

        self.agents
            .put(&mut wtxn, agent.id.as_bytes(), &StoredAgent::from_agent(agent))
            .map_err(txn_err)?;
        self.credentials
            .put(&mut wtxn, secret, agent.id.as_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn find_by_credential(&self, credential: &Credential) -> Result<Agent, DirectoryError> {
        let id = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            let raw = self
                .credentials
                .get(&rtxn, credential.expose().as_bytes())
                .map_err(txn_err)?
                .ok_or(DirectoryError::NotFound)?;
            Uuid::from_slice(raw).map_err(|e| StorageError::Corrupt {
                table: "credentials".to_string(),
                reason: e.to_string(),
            })?
        };
        self.find_by_id(id).await
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Agent, DirectoryError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let stored = self
            .agents
            .get(&rtxn, id.as_bytes())
            .map_err(txn_err)?
            .ok_or(DirectoryError::NotFound)?;
        Ok(stored.into_agent()?)
    }

    async fn list(&self) -> Result<Vec<AgentProfile>, DirectoryError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut profiles = Vec::new();
        for entry in self.agents.iter(&rtxn).map_err(txn_err)? {
            let (_, stored) = entry.map_err(txn_err)?;
            profiles.push(stored.into_agent()?.profile());
        }
        profiles.sort_by_key(|p| (p.created_at, p.id));
        Ok(profiles)
    }

    async fn try_admit(
        &self,
        id: AgentId,
        now: EpochMillis,
        cooldown_ms: EpochMillis,
    ) -> Result<Admission, DirectoryError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let Some(mut stored) = self.agents.get(&wtxn, id.as_bytes()).map_err(txn_err)? else {
            return Ok(Admission::UnknownAgent);
        };

        if let Some(last) = stored.last_write_at {
            if !cooldown_elapsed(Some(last), now, cooldown_ms) {
                return Ok(Admission::CoolingDown { last_write_at: last });
            }
        }

        stored.last_write_at = Some(now);
        self.agents
            .put(&mut wtxn, id.as_bytes(), &stored)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(Admission::Admitted)
    }

    async fn health(&self) -> Result<(), StorageError> {
        self.env.read_txn().map(|_| ()).map_err(txn_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_core::{new_agent_id, PALETTE};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::open(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    fn make_agent() -> Agent {
        Agent {
            id: new_agent_id(),
            name: "lmdb bot".to_string(),
            credential: Credential::generate(),
            color: PALETTE[7],
            created_at: 42,
            last_write_at: None,
        }
    }

    #[tokio::test]
    async fn test_stale_cell_put_is_ignored() {
        let (store, _temp_dir) = create_test_store();
        let newer = Cell {
            x: 4,
            y: 4,
            color: PALETTE[2],
            writer_id: new_agent_id(),
            written_at: 50,
        };
        let older = Cell {
            color: PALETTE[9],
            writer_id: new_agent_id(),
            written_at: 40,
            ..newer.clone()
        };

        store.put(&newer).await.expect("put should succeed");
        store.put(&older).await.expect("stale put should be a no-op");

        let read = store
            .get(Coord::new(4, 4))
            .await
            .expect("get should succeed");
        assert_eq!(read, Some(newer));
    }

    #[tokio::test]
    async fn test_cell_put_get_overwrite() {
        let (store, _temp_dir) = create_test_store();
        let writer = new_agent_id();
        let mut cell = Cell {
            x: 10,
            y: 20,
            color: PALETTE[4],
            writer_id: writer,
            written_at: 1,
        };

        store.put(&cell).await.expect("put should succeed");
        cell.color = PALETTE[10];
        cell.written_at = 2;
        store.put(&cell).await.expect("put should succeed");

        let read = store
            .get(Coord::new(10, 20))
            .await
            .expect("get should succeed")
            .expect("cell should exist");
        assert_eq!(read, cell);
        assert_eq!(store.count().await.expect("count should succeed"), 1);
        assert!(store
            .get(Coord::new(20, 10))
            .await
            .expect("get should succeed")
            .is_none());
    }

    #[tokio::test]
    async fn test_range_and_bounds() {
        let (store, _temp_dir) = create_test_store();
        let writer = new_agent_id();
        for (x, y) in [(0, 0), (5, 5), (9, 2), (300, 400)] {
            let cell = Cell {
                x,
                y,
                color: PALETTE[0],
                writer_id: writer,
                written_at: 0,
            };
            store.put(&cell).await.expect("put should succeed");
        }

        let region = store
            .range(Bounds {
                min_x: 0,
                max_x: 9,
                min_y: 0,
                max_y: 9,
            })
            .await
            .expect("range should succeed");
        assert_eq!(region.len(), 3);

        let bounds = store.bounds().await.expect("bounds should succeed");
        assert_eq!(
            bounds,
            Some(Bounds {
                min_x: 0,
                max_x: 300,
                min_y: 0,
                max_y: 400
            })
        );
    }

    #[tokio::test]
    async fn test_agents_survive_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let agent = make_agent();
        {
            let store = LmdbStore::open(temp_dir.path(), 10).expect("store creation should succeed");
            store.create(&agent).await.expect("create should succeed");
            assert_eq!(
                store.try_admit(agent.id, 100, 1_000).await.expect("admit should succeed"),
                Admission::Admitted
            );
        }

        let store = LmdbStore::open(temp_dir.path(), 10).expect("reopen should succeed");
        let found = store
            .find_by_credential(&agent.credential)
            .await
            .expect("lookup should succeed");
        assert_eq!(found.id, agent.id);
        assert_eq!(found.last_write_at, Some(100));
        assert_eq!(
            store.try_admit(agent.id, 600, 1_000).await.expect("admit should succeed"),
            Admission::CoolingDown { last_write_at: 100 }
        );
    }

    #[tokio::test]
    async fn test_duplicate_credential() {
        let (store, _temp_dir) = create_test_store();
        let first = make_agent();
        store.create(&first).await.expect("create should succeed");

        let mut second = make_agent();
        second.credential = first.credential.clone();
        assert!(matches!(
            store.create(&second).await,
            Err(DirectoryError::DuplicateCredential)
        ));
        assert!(matches!(
            store.find_by_id(second.id).await,
            Err(DirectoryError::NotFound)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admission_admits_exactly_one() {
        let (store, _temp_dir) = create_test_store();
        let store = Arc::new(store);
        let agent = make_agent();
        store.create(&agent).await.expect("create should succeed");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let id = agent.id;
            handles.push(tokio::spawn(async move { store.try_admit(id, 9_000, 5_000).await }));
        }

        let mut admitted = 0;
        for handle in handles {
            let outcome = handle
                .await
                .expect("task should not panic")
                .expect("admit should succeed");
            if outcome == Admission::Admitted {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_list_returns_profiles() {
        let (store, _temp_dir) = create_test_store();
        let agent = make_agent();
        store.create(&agent).await.expect("create should succeed");

        let listed = store.list().await.expect("list should succeed");
        assert_eq!(listed, vec![agent.profile()]);
    }
}
