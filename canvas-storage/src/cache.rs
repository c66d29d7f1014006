//! Process-local mirror of the grid store.
//!
//! The cache is an explicit state machine:
//!
//! ```text
//! Unloaded --first read--> Loading --load ok--> Loaded
//!     ^                       |
//!     +------load failed------+
//! ```
//!
//! Only one bulk load is ever in flight: the first reader installs a shared
//! future and every concurrent reader awaits that same future. Writes go to
//! the store first and are then mirrored into the cache without re-reading.
//! A write that arrives while `Unloaded` is not mirrored (the first load will
//! see it in the store). A write that arrives while `Loading` is buffered and
//! replayed on top of the loaded snapshot, so a load that started before the
//! write cannot hide it.
//!
//! Mirroring is order-independent: a cell only replaces the cached occupant
//! when it [supersedes](Cell::supersedes) it, the same rule the stores apply
//! on commit. Two writers whose store commits and cache updates interleave
//! still leave the cache agreeing with the store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use canvas_core::{Bounds, Cell, Coord, GridError, StorageError};
use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::traits::GridStore;

type LoadFuture = Shared<BoxFuture<'static, Result<Arc<Vec<Cell>>, StorageError>>>;

/// Observable lifecycle phase of a [`GridCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Unloaded,
    Loading,
    Loaded,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Unloaded => "unloaded",
            CacheStatus::Loading => "loading",
            CacheStatus::Loaded => "loaded",
        }
    }
}

#[derive(Debug, Default)]
struct LoadedGrid {
    cells: HashMap<Coord, Cell>,
    bounds: Option<Bounds>,
}

impl LoadedGrid {
    fn from_snapshot(snapshot: &[Cell]) -> Self {
        let mut grid = Self {
            cells: HashMap::with_capacity(snapshot.len()),
            bounds: None,
        };
        for cell in snapshot {
            grid.apply(cell.clone());
        }
        grid
    }

    fn apply(&mut self, cell: Cell) {
        let coord = cell.coord();
        if let Some(current) = self.cells.get(&coord) {
            if !cell.supersedes(current) {
                return;
            }
        }
        match self.bounds.as_mut() {
            Some(bounds) => bounds.include(coord),
            None => self.bounds = Some(Bounds::point(coord)),
        }
        self.cells.insert(coord, cell);
    }

    fn region(&self, bounds: Bounds, area: u64) -> Vec<Cell> {
        let mut out: Vec<Cell> = if area <= self.cells.len() as u64 {
            (bounds.min_y..=bounds.max_y)
                .flat_map(|y| (bounds.min_x..=bounds.max_x).map(move |x| Coord::new(x, y)))
                .filter_map(|coord| self.cells.get(&coord).cloned())
                .collect()
        } else {
            self.cells
                .values()
                .filter(|cell| bounds.contains(cell.coord()))
                .cloned()
                .collect()
        };
        out.sort_by_key(|c| (c.y, c.x));
        out
    }
}

enum CacheState {
    Unloaded,
    Loading { load: LoadFuture, pending: Vec<Cell> },
    Loaded(LoadedGrid),
}

/// Read-through, write-through mirror over a [`GridStore`].
///
/// All grid mutation goes through [`GridCache::put`].
pub struct GridCache {
    store: Arc<dyn GridStore>,
    state: RwLock<CacheState>,
    max_region_area: u64,
}

impl GridCache {
    pub fn new(store: Arc<dyn GridStore>, max_region_area: u64) -> Self {
        Self {
            store,
            state: RwLock::new(CacheState::Unloaded),
            max_region_area,
        }
    }

    /// The backing store, for health probes.
    pub fn store(&self) -> &Arc<dyn GridStore> {
        &self.store
    }

    pub fn max_region_area(&self) -> u64 {
        self.max_region_area
    }

    pub fn status(&self) -> CacheStatus {
        match self.state.read() {
            Ok(state) => match &*state {
                CacheState::Unloaded => CacheStatus::Unloaded,
                CacheState::Loading { .. } => CacheStatus::Loading,
                CacheState::Loaded(_) => CacheStatus::Loaded,
            },
            Err(_) => CacheStatus::Unloaded,
        }
    }

    /// Commit a cell to the store, then mirror it.
    pub async fn put(&self, cell: Cell) -> Result<(), StorageError> {
        self.store.put(&cell).await?;

        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        match &mut *state {
            CacheState::Unloaded => {}
            CacheState::Loading { pending, .. } => pending.push(cell),
            CacheState::Loaded(grid) => grid.apply(cell),
        }
        Ok(())
    }

    pub async fn get(&self, coord: Coord) -> Result<Option<Cell>, StorageError> {
        self.read(|grid| grid.cells.get(&coord).cloned()).await
    }

    /// Every written cell inside `bounds`, row-major.
    ///
    /// Fails with [`GridError::RegionTooLarge`] when the area exceeds the
    /// configured maximum.
    pub async fn range(&self, bounds: Bounds) -> Result<Vec<Cell>, GridError> {
        let area = bounds.area().ok_or(GridError::InvertedRegion)?;
        if area > self.max_region_area {
            return Err(GridError::RegionTooLarge {
                area,
                max: self.max_region_area,
            });
        }
        Ok(self.read(|grid| grid.region(bounds, area)).await?)
    }

    pub async fn count(&self) -> Result<u64, StorageError> {
        self.read(|grid| grid.cells.len() as u64).await
    }

    pub async fn bounds(&self) -> Result<Option<Bounds>, StorageError> {
        self.read(|grid| grid.bounds).await
    }

    /// Every written cell, for bulk export.
    pub async fn snapshot(&self) -> Result<Vec<Cell>, StorageError> {
        self.read(|grid| grid.cells.values().cloned().collect()).await
    }

    /// Drive the state machine to `Loaded`.
    ///
    /// Concurrent callers share one in-flight load. A failed load returns the
    /// cache to `Unloaded` so the next reader retries.
    pub async fn ensure_loaded(&self) -> Result<(), StorageError> {
        let load = {
            let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
            match &*state {
                CacheState::Loaded(_) => return Ok(()),
                CacheState::Loading { load, .. } => load.clone(),
                CacheState::Unloaded => {
                    let store = Arc::clone(&self.store);
                    let load = async move { store.load_all().await.map(Arc::new) }
                        .boxed()
                        .shared();
                    *state = CacheState::Loading {
                        load: load.clone(),
                        pending: Vec::new(),
                    };
                    tracing::debug!("grid cache load started");
                    load
                }
            }
        };

        let outcome = load.clone().await;

        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        let ours = matches!(&*state, CacheState::Loading { load: current, .. } if Shared::ptr_eq(current, &load));
        match outcome {
            Ok(snapshot) => {
                if ours {
                    let pending = match std::mem::replace(&mut *state, CacheState::Unloaded) {
                        CacheState::Loading { pending, .. } => pending,
                        _ => Vec::new(),
                    };
                    let mut grid = LoadedGrid::from_snapshot(&snapshot);
                    let replayed = pending.len();
                    for cell in pending {
                        grid.apply(cell);
                    }
                    tracing::info!(cells = grid.cells.len(), replayed, "grid cache loaded");
                    *state = CacheState::Loaded(grid);
                }
                Ok(())
            }
            Err(e) => {
                if ours {
                    tracing::warn!(error = %e, "grid cache load failed");
                    *state = CacheState::Unloaded;
                }
                Err(e)
            }
        }
    }

    async fn read<R>(&self, f: impl FnOnce(&LoadedGrid) -> R) -> Result<R, StorageError> {
        self.ensure_loaded().await?;
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        match &*state {
            CacheState::Loaded(grid) => Ok(f(grid)),
            _ => Err(StorageError::Unavailable {
                reason: "grid cache is not loaded".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryGridStore;
    use async_trait::async_trait;
    use canvas_core::{new_agent_id, AgentId, PALETTE};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Wraps the in-memory store, counting bulk loads and optionally holding
    /// each load open until released. `hold_put` stalls the write stamped
    /// with the given time after it has committed.
    #[derive(Default)]
    struct InstrumentedStore {
        inner: InMemoryGridStore,
        loads: AtomicUsize,
        failures_left: AtomicUsize,
        gate: Option<Arc<Notify>>,
        hold_put: Option<(i64, Arc<Notify>)>,
    }

    #[async_trait]
    impl GridStore for InstrumentedStore {
        async fn get(&self, coord: Coord) -> Result<Option<Cell>, StorageError> {
            self.inner.get(coord).await
        }

        async fn put(&self, cell: &Cell) -> Result<(), StorageError> {
            self.inner.put(cell).await?;
            if let Some((at, release)) = &self.hold_put {
                if cell.written_at == *at {
                    release.notified().await;
                }
            }
            Ok(())
        }

        async fn range(&self, bounds: Bounds) -> Result<Vec<Cell>, StorageError> {
            self.inner.range(bounds).await
        }

        async fn count(&self) -> Result<u64, StorageError> {
            self.inner.count().await
        }

        async fn bounds(&self) -> Result<Option<Bounds>, StorageError> {
            self.inner.bounds().await
        }

        async fn load_all(&self) -> Result<Vec<Cell>, StorageError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let snapshot = self.inner.load_all().await?;
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::Unavailable {
                    reason: "injected".to_string(),
                });
            }
            Ok(snapshot)
        }
    }

    fn cell(x: u32, y: u32, writer: AgentId, at: i64) -> Cell {
        Cell {
            x,
            y,
            color: PALETTE[4],
            writer_id: writer,
            written_at: at,
        }
    }

    async fn wait_for(cache: &GridCache, status: CacheStatus) {
        while cache.status() != status {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_share_one_load() -> Result<(), StorageError> {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(InstrumentedStore {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let cache = Arc::new(GridCache::new(store.clone(), 1_000_000));

        let mut readers = Vec::new();
        for _ in 0..12 {
            let cache = Arc::clone(&cache);
            readers.push(tokio::spawn(async move { cache.count().await }));
        }
        wait_for(&cache, CacheStatus::Loading).await;
        gate.notify_one();

        for reader in readers {
            assert_eq!(reader.await.map_err(|e| StorageError::Unavailable { reason: e.to_string() })??, 0);
        }
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.status(), CacheStatus::Loaded);
        Ok(())
    }

    #[tokio::test]
    async fn test_write_before_load_is_picked_up_by_load() -> Result<(), StorageError> {
        let store = Arc::new(InstrumentedStore::default());
        let cache = GridCache::new(store.clone(), 1_000_000);
        let writer = new_agent_id();

        cache.put(cell(1, 1, writer, 5)).await?;
        assert_eq!(cache.status(), CacheStatus::Unloaded);

        assert_eq!(cache.get(Coord::new(1, 1)).await?.map(|c| c.written_at), Some(5));
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_write_during_load_is_replayed() -> Result<(), StorageError> {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(InstrumentedStore {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let cache = Arc::new(GridCache::new(store.clone(), 1_000_000));
        let writer = new_agent_id();

        let reader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.count().await })
        };
        wait_for(&cache, CacheStatus::Loading).await;

        // The snapshot was taken before this write reached the store.
        cache.put(cell(7, 3, writer, 9)).await?;
        gate.notify_one();

        let counted = reader
            .await
            .map_err(|e| StorageError::Unavailable { reason: e.to_string() })??;
        assert_eq!(counted, 1);
        assert_eq!(cache.get(Coord::new(7, 3)).await?.map(|c| c.written_at), Some(9));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_load_resets_and_retries() -> Result<(), StorageError> {
        let store = Arc::new(InstrumentedStore {
            failures_left: AtomicUsize::new(1),
            ..Default::default()
        });
        let cache = GridCache::new(store.clone(), 1_000_000);

        assert!(cache.count().await.is_err());
        assert_eq!(cache.status(), CacheStatus::Unloaded);

        assert_eq!(cache.count().await?, 0);
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_loaded_cache_tracks_writes_and_bounds() -> Result<(), StorageError> {
        let cache = GridCache::new(Arc::new(InMemoryGridStore::new()), 1_000_000);
        let writer = new_agent_id();
        cache.ensure_loaded().await?;

        cache.put(cell(4, 4, writer, 1)).await?;
        cache.put(cell(2, 8, writer, 2)).await?;
        cache.put(cell(4, 4, writer, 3)).await?;

        assert_eq!(cache.count().await?, 2);
        assert_eq!(cache.get(Coord::new(4, 4)).await?.map(|c| c.written_at), Some(3));
        assert_eq!(
            cache.bounds().await?,
            Some(Bounds {
                min_x: 2,
                max_x: 4,
                min_y: 4,
                max_y: 8
            })
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_late_mirror_of_older_write_is_ignored() -> Result<(), StorageError> {
        let release = Arc::new(Notify::new());
        let store = Arc::new(InstrumentedStore {
            hold_put: Some((1, Arc::clone(&release))),
            ..Default::default()
        });
        let cache = Arc::new(GridCache::new(store.clone(), 1_000_000));
        cache.ensure_loaded().await?;
        let (first, second) = (new_agent_id(), new_agent_id());

        // The older write commits, then stalls before reaching the cache.
        let stalled = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.put(cell(5, 5, first, 1)).await })
        };
        while store.inner.get(Coord::new(5, 5)).await?.is_none() {
            tokio::task::yield_now().await;
        }

        cache.put(cell(5, 5, second, 2)).await?;
        release.notify_one();
        stalled
            .await
            .map_err(|e| StorageError::Unavailable { reason: e.to_string() })??;

        let cached = cache.get(Coord::new(5, 5)).await?;
        let stored = store.inner.get(Coord::new(5, 5)).await?;
        assert_eq!(cached.as_ref().map(|c| c.writer_id), Some(second));
        assert_eq!(cached, stored);
        Ok(())
    }

    #[tokio::test]
    async fn test_write_during_load_older_than_snapshot_is_dropped() -> Result<(), StorageError> {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(InstrumentedStore {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let writer = new_agent_id();
        store.inner.put(&cell(2, 2, writer, 10)).await?;
        let cache = Arc::new(GridCache::new(store.clone(), 1_000_000));

        let reader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.count().await })
        };
        wait_for(&cache, CacheStatus::Loading).await;
        {
            let mut state = cache.state.write().map_err(|_| StorageError::LockPoisoned)?;
            if let CacheState::Loading { pending, .. } = &mut *state {
                pending.push(cell(2, 2, writer, 4));
            }
        }
        gate.notify_one();
        reader
            .await
            .map_err(|e| StorageError::Unavailable { reason: e.to_string() })??;

        assert_eq!(cache.get(Coord::new(2, 2)).await?.map(|c| c.written_at), Some(10));
        Ok(())
    }

    #[tokio::test]
    async fn test_unbounded_region_is_too_large() {
        let cache = GridCache::new(Arc::new(InMemoryGridStore::new()), 1_000_000);
        let everything = Bounds {
            min_x: 0,
            max_x: u32::MAX,
            min_y: 0,
            max_y: u32::MAX,
        };
        assert_eq!(
            cache.range(everything).await,
            Err(GridError::RegionTooLarge {
                area: u64::MAX,
                max: 1_000_000
            })
        );
    }

    #[tokio::test]
    async fn test_region_limits() -> Result<(), GridError> {
        let cache = GridCache::new(Arc::new(InMemoryGridStore::new()), 100);
        let writer = new_agent_id();
        cache.put(cell(0, 0, writer, 1)).await?;
        cache.put(cell(9, 9, writer, 1)).await?;
        cache.put(cell(10, 10, writer, 1)).await?;

        let full = Bounds {
            min_x: 0,
            max_x: 9,
            min_y: 0,
            max_y: 9,
        };
        assert_eq!(cache.range(full).await?.len(), 2);

        let too_big = Bounds {
            min_x: 0,
            max_x: 10,
            min_y: 0,
            max_y: 9,
        };
        assert_eq!(
            cache.range(too_big).await,
            Err(GridError::RegionTooLarge { area: 110, max: 100 })
        );

        let inverted = Bounds {
            min_x: 5,
            max_x: 1,
            min_y: 0,
            max_y: 0,
        };
        assert_eq!(cache.range(inverted).await, Err(GridError::InvertedRegion));
        Ok(())
    }
}
