//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use canvas_core::{CanvasConfig, Clock};
use canvas_storage::{AgentDirectory, GridCache, GridStore};

use crate::broadcaster::Broadcaster;
use crate::config::ObserverLimits;
use crate::services::{AgentRegistry, PlacementController};

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<PlacementController>,
    pub registry: Arc<AgentRegistry>,
    /// Process-local view of the grid; reads never touch the store once loaded.
    pub grid: Arc<GridCache>,
    pub broadcaster: Arc<Broadcaster>,
    pub canvas: CanvasConfig,
    pub start_time: Instant,
}

impl AppState {
    /// Wire every service over one grid store and one agent directory.
    ///
    /// The broadcaster is created here but its maintenance task is not
    /// started; the binary owns that lifecycle.
    pub fn new(
        store: Arc<dyn GridStore>,
        directory: Arc<dyn AgentDirectory>,
        clock: Arc<dyn Clock>,
        canvas: CanvasConfig,
        limits: ObserverLimits,
    ) -> Self {
        let grid = Arc::new(GridCache::new(store, canvas.max_region_area));
        let broadcaster = Broadcaster::new(limits, Arc::clone(&clock));
        let registry = Arc::new(AgentRegistry::new(
            Arc::clone(&directory),
            Arc::clone(&clock),
            canvas.cooldown_ms,
        ));
        let controller = Arc::new(PlacementController::new(
            directory,
            Arc::clone(&grid),
            Arc::clone(&broadcaster),
            clock,
            canvas.clone(),
        ));

        Self {
            controller,
            registry,
            grid,
            broadcaster,
            canvas,
            start_time: Instant::now(),
        }
    }
}

crate::impl_from_ref!(Arc<PlacementController>, controller);
crate::impl_from_ref!(Arc<AgentRegistry>, registry);
crate::impl_from_ref!(Arc<GridCache>, grid);
crate::impl_from_ref!(Arc<Broadcaster>, broadcaster);
crate::impl_from_ref!(CanvasConfig, canvas);
crate::impl_from_ref!(Instant, start_time);
