//! Pixel Placement Admission Controller
//!
//! Runs one placement request through its stages:
//!
//! ```text
//! Received -> CredentialChecked -> CoordinatesChecked -> ColorChecked
//!          -> CooldownAdmitted -> Committed -> Notified -> Responded
//! ```
//!
//! Any check may end in `Rejected(reason)`. There is no automatic retry.
//! Cooldown admission is the directory's atomic conditional update; this
//! module never reads `last_write_at` to decide admission.

use canvas_core::{
    checked_coord, Admission, Agent, CanvasConfig, Cell, CellChange, Clock, Color, ColorInput,
    Coord, EpochMillis, PlacementReceipt, PlacementRejection, PlacementRequest, PlacementResult,
};
use canvas_storage::{AgentDirectory, GridCache};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use super::authenticate;
use crate::broadcaster::Broadcaster;
use crate::telemetry::metrics::with_metrics;

/// Log an unexpected failure in full and collapse it to a generic rejection.
fn internal<E: Display>(stage: &'static str) -> impl FnOnce(E) -> PlacementRejection {
    move |e| {
        error!(stage, error = %e, "placement failed");
        PlacementRejection::InternalError
    }
}

/// Admission controller shared by every placement handler.
pub struct PlacementController {
    directory: Arc<dyn AgentDirectory>,
    grid: Arc<GridCache>,
    broadcaster: Arc<Broadcaster>,
    clock: Arc<dyn Clock>,
    canvas: CanvasConfig,
}

impl PlacementController {
    pub fn new(
        directory: Arc<dyn AgentDirectory>,
        grid: Arc<GridCache>,
        broadcaster: Arc<Broadcaster>,
        clock: Arc<dyn Clock>,
        canvas: CanvasConfig,
    ) -> Self {
        Self {
            directory,
            grid,
            broadcaster,
            clock,
            canvas,
        }
    }

    pub fn canvas(&self) -> &CanvasConfig {
        &self.canvas
    }

    /// Run a placement to completion on its own task.
    ///
    /// The commit is not tied to the caller: if the HTTP client disconnects
    /// mid-request the placement still finishes.
    pub async fn place_detached(self: &Arc<Self>, request: PlacementRequest) -> PlacementResult {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.place(request).await })
            .await
            .map_err(internal("join"))?
    }

    /// Run one placement request through every stage.
    pub async fn place(&self, request: PlacementRequest) -> PlacementResult {
        let started = Instant::now();
        let result = self.run_stages(request).await;

        let outcome = match &result {
            Ok(_) => "placed",
            Err(rejection) => rejection.reason(),
        };
        with_metrics(|m| m.record_placement(outcome, started.elapsed().as_secs_f64()));

        match &result {
            Ok(receipt) => info!(
                writer = %receipt.writer_id,
                x = receipt.x,
                y = receipt.y,
                color = %receipt.color,
                was_override = receipt.was_override,
                "pixel placed"
            ),
            Err(rejection) => debug!(reason = rejection.reason(), "placement rejected"),
        }
        result
    }

    async fn run_stages(&self, request: PlacementRequest) -> PlacementResult {
        // Received -> CredentialChecked
        let agent = authenticate(self.directory.as_ref(), &request.credential).await?;

        // CredentialChecked -> CoordinatesChecked
        let coord = self.check_coordinates(request.x, request.y)?;

        // CoordinatesChecked -> ColorChecked
        let color = self.resolve_color(&agent, &request.color)?;

        // ColorChecked -> CooldownAdmitted
        let now = self.clock.now_millis();
        self.admit(&agent, now).await?;

        // CooldownAdmitted -> Committed
        let previous = self.commit(coord, color, &agent, now).await?;

        let receipt = PlacementReceipt {
            x: coord.x,
            y: coord.y,
            color,
            writer_id: agent.id,
            writer_name: agent.name,
            was_override: previous.is_some(),
            previous_writer_id: previous.map(|cell| cell.writer_id),
            placed_at: now,
            next_eligible_at: now.saturating_add(self.canvas.cooldown_ms),
        };

        // Committed -> Notified
        self.broadcaster.publish(CellChange::from(&receipt));

        // Notified -> Responded
        Ok(receipt)
    }

    fn check_coordinates(&self, x: Option<i64>, y: Option<i64>) -> Result<Coord, PlacementRejection> {
        let out_of_range = PlacementRejection::InvalidCoordinates {
            min: 0,
            max: self.canvas.max_coord(),
        };
        match (x, y) {
            (Some(x), Some(y)) => checked_coord(x, y, self.canvas.grid_size).ok_or(out_of_range),
            _ => Err(out_of_range),
        }
    }

    fn resolve_color(&self, agent: &Agent, requested: &ColorInput) -> Result<Color, PlacementRejection> {
        match requested {
            ColorInput::Default => Ok(agent.color),
            ColorInput::Text(raw) => Color::parse(raw).map_err(|_| PlacementRejection::invalid_color()),
            ColorInput::NotText => Err(PlacementRejection::invalid_color()),
        }
    }

    async fn admit(&self, agent: &Agent, now: EpochMillis) -> Result<(), PlacementRejection> {
        let cooldown = self.canvas.cooldown_ms;
        let admission = self
            .directory
            .try_admit(agent.id, now, cooldown)
            .await
            .map_err(internal("admit"))?;

        match admission {
            Admission::Admitted => Ok(()),
            Admission::CoolingDown { last_write_at } => Err(PlacementRejection::RateLimited {
                wait_ms: canvas_core::remaining_wait(last_write_at, now, cooldown),
                next_eligible_at: last_write_at.saturating_add(cooldown),
            }),
            Admission::UnknownAgent => {
                // Authenticated a moment ago; the record disappeared since.
                debug!(agent = %agent.id, "agent vanished during admission");
                Err(PlacementRejection::RateLimited {
                    wait_ms: cooldown,
                    next_eligible_at: now.saturating_add(cooldown),
                })
            }
        }
    }

    /// Write the cell and return what it replaced.
    ///
    /// The read of the previous occupant is for reporting only; concurrent
    /// writers to the same cell race and the last committed write wins.
    async fn commit(
        &self,
        coord: Coord,
        color: Color,
        agent: &Agent,
        now: EpochMillis,
    ) -> Result<Option<Cell>, PlacementRejection> {
        let previous = self.grid.get(coord).await.map_err(internal("read_previous"))?;
        let cell = Cell {
            x: coord.x,
            y: coord.y,
            color,
            writer_id: agent.id,
            written_at: now,
        };
        self.grid.put(cell).await.map_err(internal("commit"))?;

        if previous.is_none() {
            if let Ok(count) = self.grid.count().await {
                with_metrics(|m| m.set_cells_claimed(count));
            }
        }
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObserverLimits;
    use async_trait::async_trait;
    use canvas_core::{
        new_agent_id, AgentId, AgentProfile, Bounds, Credential, DirectoryError, ManualClock,
        StorageError, PALETTE,
    };
    use canvas_storage::{GridStore, InMemoryAgentDirectory, InMemoryGridStore};

    struct Harness {
        controller: PlacementController,
        directory: Arc<InMemoryAgentDirectory>,
        grid: Arc<GridCache>,
        clock: ManualClock,
    }

    fn harness(grid_size: u32, cooldown_ms: EpochMillis) -> Harness {
        let clock = ManualClock::new(0);
        let directory = Arc::new(InMemoryAgentDirectory::new());
        let grid = Arc::new(GridCache::new(Arc::new(InMemoryGridStore::new()), 1_000_000));
        let broadcaster = Broadcaster::new(ObserverLimits::default(), Arc::new(clock.clone()));
        let canvas = CanvasConfig {
            grid_size,
            cooldown_ms,
            ..CanvasConfig::default()
        };
        let controller = PlacementController::new(
            directory.clone(),
            grid.clone(),
            broadcaster,
            Arc::new(clock.clone()),
            canvas,
        );
        Harness {
            controller,
            directory,
            grid,
            clock,
        }
    }

    async fn register(h: &Harness, name: &str) -> Result<Agent, DirectoryError> {
        let agent = Agent {
            id: new_agent_id(),
            name: name.to_string(),
            credential: Credential::generate(),
            color: PALETTE[2],
            created_at: 0,
            last_write_at: None,
        };
        h.directory.create(&agent).await?;
        Ok(agent)
    }

    #[tokio::test]
    async fn test_stage_order_credential_before_coordinates() {
        let h = harness(10, 1_000);
        let result = h
            .controller
            .place(PlacementRequest::new("not-hex", 99, 99, Some("#123456")))
            .await;
        assert_eq!(result, Err(PlacementRejection::InvalidCredential));
    }

    #[tokio::test]
    async fn test_unknown_credential_rejected() {
        let h = harness(10, 1_000);
        let unknown = Credential::generate();
        let result = h
            .controller
            .place(PlacementRequest::new(unknown.expose(), 1, 1, None))
            .await;
        assert_eq!(result, Err(PlacementRejection::InvalidCredential));
    }

    #[tokio::test]
    async fn test_coordinates_before_color() -> Result<(), DirectoryError> {
        let h = harness(1000, 1_000);
        let agent = register(&h, "edge").await?;
        let result = h
            .controller
            .place(PlacementRequest::new(agent.credential.expose(), 1000, 0, Some("mauve")))
            .await;
        assert_eq!(
            result,
            Err(PlacementRejection::InvalidCoordinates { min: 0, max: 999 })
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_coordinate_is_invalid_coordinates() -> Result<(), DirectoryError> {
        let h = harness(10, 1_000);
        let agent = register(&h, "typo").await?;
        let request = PlacementRequest {
            credential: agent.credential.expose().to_string(),
            x: None,
            y: Some(1),
            color: ColorInput::Default,
        };
        assert_eq!(
            h.controller.place(request).await,
            Err(PlacementRejection::InvalidCoordinates { min: 0, max: 9 })
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_non_text_color_is_invalid_color_after_credential() -> Result<(), DirectoryError> {
        let h = harness(10, 1_000);
        let agent = register(&h, "numeric").await?;
        let request = |credential: &str| PlacementRequest {
            credential: credential.to_string(),
            x: Some(1),
            y: Some(1),
            color: ColorInput::NotText,
        };

        assert_eq!(
            h.controller.place(request(agent.credential.expose())).await,
            Err(PlacementRejection::invalid_color())
        );
        assert_eq!(
            h.controller.place(request(&"0".repeat(64))).await,
            Err(PlacementRejection::InvalidCredential)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_color_does_not_consume_cooldown() -> Result<(), DirectoryError> {
        let h = harness(10, 1_000);
        let agent = register(&h, "picky").await?;
        let result = h
            .controller
            .place(PlacementRequest::new(agent.credential.expose(), 1, 1, Some("#123456")))
            .await;
        assert_eq!(result, Err(PlacementRejection::invalid_color()));
        assert_eq!(h.directory.find_by_id(agent.id).await?.last_write_at, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_default_color_and_case_insensitive_palette() -> Result<(), DirectoryError> {
        let h = harness(10, 1_000);
        let agent = register(&h, "painter").await?;

        let receipt = h
            .controller
            .place(PlacementRequest::new(agent.credential.expose(), 2, 3, None))
            .await
            .map_err(|_| DirectoryError::NotFound)?;
        assert_eq!(receipt.color, agent.color);

        h.clock.advance(1_000);
        let receipt = h
            .controller
            .place(PlacementRequest::new(agent.credential.expose(), 2, 3, Some("#ff0000")))
            .await
            .map_err(|_| DirectoryError::NotFound)?;
        assert_eq!(receipt.color.to_hex(), "#FF0000");
        assert!(receipt.was_override);
        assert_eq!(receipt.previous_writer_id, Some(agent.id));
        Ok(())
    }

    /// Grid store whose writes always fail.
    struct BrokenStore;

    #[async_trait]
    impl GridStore for BrokenStore {
        async fn get(&self, _: Coord) -> Result<Option<Cell>, StorageError> {
            Ok(None)
        }
        async fn put(&self, _: &Cell) -> Result<(), StorageError> {
            Err(StorageError::WriteFailed {
                what: "cell".to_string(),
                reason: "disk full".to_string(),
            })
        }
        async fn range(&self, _: Bounds) -> Result<Vec<Cell>, StorageError> {
            Ok(Vec::new())
        }
        async fn count(&self) -> Result<u64, StorageError> {
            Ok(0)
        }
        async fn bounds(&self) -> Result<Option<Bounds>, StorageError> {
            Ok(None)
        }
        async fn load_all(&self) -> Result<Vec<Cell>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_storage_failure_is_internal_error() -> Result<(), DirectoryError> {
        let clock = ManualClock::new(0);
        let directory = Arc::new(InMemoryAgentDirectory::new());
        let controller = PlacementController::new(
            directory.clone(),
            Arc::new(GridCache::new(Arc::new(BrokenStore), 100)),
            Broadcaster::new(ObserverLimits::default(), Arc::new(clock.clone())),
            Arc::new(clock),
            CanvasConfig::default(),
        );
        let agent = Agent {
            id: new_agent_id(),
            name: "unlucky".to_string(),
            credential: Credential::generate(),
            color: PALETTE[0],
            created_at: 0,
            last_write_at: None,
        };
        directory.create(&agent).await?;

        let result = controller
            .place(PlacementRequest::new(agent.credential.expose(), 0, 0, None))
            .await;
        assert_eq!(result, Err(PlacementRejection::InternalError));
        Ok(())
    }

    /// Directory that authenticates but then loses the agent.
    struct VanishingDirectory(Agent);

    #[async_trait]
    impl AgentDirectory for VanishingDirectory {
        async fn create(&self, _: &Agent) -> Result<(), DirectoryError> {
            Ok(())
        }
        async fn find_by_credential(&self, _: &Credential) -> Result<Agent, DirectoryError> {
            Ok(self.0.clone())
        }
        async fn find_by_id(&self, _: AgentId) -> Result<Agent, DirectoryError> {
            Err(DirectoryError::NotFound)
        }
        async fn list(&self) -> Result<Vec<AgentProfile>, DirectoryError> {
            Ok(Vec::new())
        }
        async fn try_admit(
            &self,
            _: AgentId,
            _: EpochMillis,
            _: EpochMillis,
        ) -> Result<Admission, DirectoryError> {
            Ok(Admission::UnknownAgent)
        }
    }

    #[tokio::test]
    async fn test_vanished_agent_is_rate_limited() {
        let clock = ManualClock::new(500);
        let agent = Agent {
            id: new_agent_id(),
            name: "ghost".to_string(),
            credential: Credential::generate(),
            color: PALETTE[0],
            created_at: 0,
            last_write_at: None,
        };
        let credential = agent.credential.expose().to_string();
        let controller = PlacementController::new(
            Arc::new(VanishingDirectory(agent)),
            Arc::new(GridCache::new(Arc::new(InMemoryGridStore::new()), 100)),
            Broadcaster::new(ObserverLimits::default(), Arc::new(clock.clone())),
            Arc::new(clock),
            CanvasConfig {
                cooldown_ms: 1_000,
                ..CanvasConfig::default()
            },
        );

        let result = controller
            .place(PlacementRequest::new(credential, 0, 0, None))
            .await;
        assert_eq!(
            result,
            Err(PlacementRejection::RateLimited {
                wait_ms: 1_000,
                next_eligible_at: 1_500
            })
        );
    }

    #[tokio::test]
    async fn test_rejected_placement_leaves_grid_untouched() -> Result<(), StorageError> {
        let h = harness(10, 10_000);
        let agent = register(&h, "eager")
            .await
            .map_err(|_| StorageError::LockPoisoned)?;

        assert!(h
            .controller
            .place(PlacementRequest::new(agent.credential.expose(), 5, 5, None))
            .await
            .is_ok());
        h.clock.set(4_000);
        assert!(h
            .controller
            .place(PlacementRequest::new(agent.credential.expose(), 6, 6, None))
            .await
            .is_err());
        assert_eq!(h.grid.get(Coord::new(6, 6)).await?, None);
        assert_eq!(h.grid.count().await?, 1);
        Ok(())
    }
}
