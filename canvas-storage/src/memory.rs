//! In-memory backends.
//!
//! Used as the default backend for single-process deployments and as the
//! test double for everything above the storage layer. Nothing survives a
//! restart.

use async_trait::async_trait;
use canvas_core::{
    cooldown_elapsed, Admission, Agent, AgentId, AgentProfile, Bounds, Cell, Coord, Credential,
    DirectoryError, EpochMillis, StorageError,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::traits::{AgentDirectory, GridStore};

// ============================================================================
// GRID
// ============================================================================

/// Grid store backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryGridStore {
    cells: DashMap<Coord, Cell>,
}

impl InMemoryGridStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GridStore for InMemoryGridStore {
    async fn get(&self, coord: Coord) -> Result<Option<Cell>, StorageError> {
        Ok(self.cells.get(&coord).map(|entry| entry.value().clone()))
    }

    async fn put(&self, cell: &Cell) -> Result<(), StorageError> {
        match self.cells.entry(cell.coord()) {
            Entry::Occupied(mut slot) => {
                if cell.supersedes(slot.get()) {
                    slot.insert(cell.clone());
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(cell.clone());
            }
        }
        Ok(())
    }

    async fn range(&self, bounds: Bounds) -> Result<Vec<Cell>, StorageError> {
        let mut cells: Vec<Cell> = self
            .cells
            .iter()
            .filter(|entry| bounds.contains(*entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        cells.sort_by_key(|c| (c.y, c.x));
        Ok(cells)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.cells.len() as u64)
    }

    async fn bounds(&self) -> Result<Option<Bounds>, StorageError> {
        let mut bounds: Option<Bounds> = None;
        for entry in self.cells.iter() {
            let coord = *entry.key();
            match bounds.as_mut() {
                Some(b) => b.include(coord),
                None => bounds = Some(Bounds::point(coord)),
            }
        }
        Ok(bounds)
    }

    async fn load_all(&self) -> Result<Vec<Cell>, StorageError> {
        Ok(self.cells.iter().map(|entry| entry.value().clone()).collect())
    }
}

// ============================================================================
// DIRECTORY
// ============================================================================

/// Agent directory backed by two concurrent maps.
///
/// `try_admit` holds the shard write guard for the agent's entry across the
/// compare and the update, which makes the cooldown check atomic per agent.
#[derive(Debug, Default)]
pub struct InMemoryAgentDirectory {
    agents: DashMap<AgentId, Agent>,
    by_credential: DashMap<String, AgentId>,
}

impl InMemoryAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[async_trait]
impl AgentDirectory for InMemoryAgentDirectory {
    async fn create(&self, agent: &Agent) -> Result<(), DirectoryError> {
        match self.by_credential.entry(agent.credential.expose().to_string()) {
            Entry::Occupied(_) => Err(DirectoryError::DuplicateCredential),
            Entry::Vacant(slot) => {
                match self.agents.entry(agent.id) {
                    Entry::Occupied(_) => return Err(DirectoryError::DuplicateId { id: agent.id }),
                    Entry::Vacant(record) => {
                        record.insert(agent.clone());
                    }
                }
                slot.insert(agent.id);
                Ok(())
            }
        }
    }

    async fn find_by_credential(&self, credential: &Credential) -> Result<Agent, DirectoryError> {
        let id = self
            .by_credential
            .get(credential.expose())
            .map(|entry| *entry.value())
            .ok_or(DirectoryError::NotFound)?;
        self.find_by_id(id).await
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Agent, DirectoryError> {
        self.agents
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(DirectoryError::NotFound)
    }

    async fn list(&self) -> Result<Vec<AgentProfile>, DirectoryError> {
        let mut profiles: Vec<AgentProfile> =
            self.agents.iter().map(|entry| entry.value().profile()).collect();
        profiles.sort_by_key(|p| (p.created_at, p.id));
        Ok(profiles)
    }

    async fn try_admit(
        &self,
        id: AgentId,
        now: EpochMillis,
        cooldown_ms: EpochMillis,
    ) -> Result<Admission, DirectoryError> {
        let Some(mut agent) = self.agents.get_mut(&id) else {
            return Ok(Admission::UnknownAgent);
        };
        match agent.last_write_at {
            Some(last) if !cooldown_elapsed(Some(last), now, cooldown_ms) => {
                Ok(Admission::CoolingDown { last_write_at: last })
            }
            _ => {
                agent.last_write_at = Some(now);
                Ok(Admission::Admitted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_core::{new_agent_id, PALETTE};
    use std::sync::Arc;

    fn agent(name: &str) -> Agent {
        Agent {
            id: new_agent_id(),
            name: name.to_string(),
            credential: Credential::generate(),
            color: PALETTE[4],
            created_at: 0,
            last_write_at: None,
        }
    }

    fn cell(x: u32, y: u32, writer: AgentId, at: EpochMillis) -> Cell {
        Cell {
            x,
            y,
            color: PALETTE[10],
            writer_id: writer,
            written_at: at,
        }
    }

    #[tokio::test]
    async fn test_grid_upsert_and_bounds() -> Result<(), StorageError> {
        let store = InMemoryGridStore::new();
        let writer = new_agent_id();
        assert_eq!(store.bounds().await?, None);

        store.put(&cell(3, 4, writer, 1)).await?;
        store.put(&cell(9, 1, writer, 2)).await?;
        store.put(&cell(3, 4, writer, 3)).await?;

        assert_eq!(store.count().await?, 2);
        assert_eq!(store.get(Coord::new(3, 4)).await?.map(|c| c.written_at), Some(3));
        assert_eq!(
            store.bounds().await?,
            Some(Bounds {
                min_x: 3,
                max_x: 9,
                min_y: 1,
                max_y: 4
            })
        );

        let region = store
            .range(Bounds {
                min_x: 0,
                max_x: 5,
                min_y: 0,
                max_y: 5,
            })
            .await?;
        assert_eq!(region.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_put_does_not_replace_newer_cell() -> Result<(), StorageError> {
        let store = InMemoryGridStore::new();
        let (early, late) = (new_agent_id(), new_agent_id());

        store.put(&cell(6, 6, late, 20)).await?;
        store.put(&cell(6, 6, early, 10)).await?;

        let current = store.get(Coord::new(6, 6)).await?;
        assert_eq!(current.map(|c| (c.writer_id, c.written_at)), Some((late, 20)));
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_credential_rejected() -> Result<(), DirectoryError> {
        let directory = InMemoryAgentDirectory::new();
        let first = agent("first");
        directory.create(&first).await?;

        let mut clash = agent("second");
        clash.credential = first.credential.clone();
        assert_eq!(
            directory.create(&clash).await,
            Err(DirectoryError::DuplicateCredential)
        );
        assert_eq!(directory.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_lookup_by_credential_and_id() -> Result<(), DirectoryError> {
        let directory = InMemoryAgentDirectory::new();
        let a = agent("lookup");
        directory.create(&a).await?;

        assert_eq!(directory.find_by_credential(&a.credential).await?.id, a.id);
        assert_eq!(directory.find_by_id(a.id).await?.name, "lookup");
        assert_eq!(
            directory
                .find_by_credential(&Credential::generate())
                .await
                .map(|a| a.id),
            Err(DirectoryError::NotFound)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_admission_timeline() -> Result<(), DirectoryError> {
        let directory = InMemoryAgentDirectory::new();
        let a = agent("timeline");
        directory.create(&a).await?;

        assert_eq!(directory.try_admit(a.id, 0, 10_000).await?, Admission::Admitted);
        assert_eq!(
            directory.try_admit(a.id, 4_000, 10_000).await?,
            Admission::CoolingDown { last_write_at: 0 }
        );
        assert_eq!(directory.try_admit(a.id, 10_001, 10_000).await?, Admission::Admitted);
        assert_eq!(directory.find_by_id(a.id).await?.last_write_at, Some(10_001));
        assert_eq!(
            directory.try_admit(new_agent_id(), 0, 10_000).await?,
            Admission::UnknownAgent
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admission_admits_exactly_one() -> Result<(), DirectoryError> {
        let directory = Arc::new(InMemoryAgentDirectory::new());
        let a = agent("racer");
        directory.create(&a).await?;

        let mut handles = Vec::new();
        for _ in 0..32 {
            let directory = Arc::clone(&directory);
            handles.push(tokio::spawn(async move {
                directory.try_admit(a.id, 50_000, 10_000).await
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if let Ok(Ok(Admission::Admitted)) = handle.await {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_never_carries_credentials() -> Result<(), DirectoryError> {
        let directory = InMemoryAgentDirectory::new();
        let a = agent("secretive");
        directory.create(&a).await?;

        let listed = directory.list().await?;
        let json = serde_json::to_string(&listed).map_err(|e| {
            DirectoryError::Storage(StorageError::Corrupt {
                table: "agents".to_string(),
                reason: e.to_string(),
            })
        })?;
        assert!(!json.contains(a.credential.expose()));
        Ok(())
    }
}
