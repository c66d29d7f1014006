use std::sync::Arc;

use canvas_api::services::AgentRegistry;
use canvas_api::types::{RegisterAgentRequest, RegisteredAgent};
use canvas_api::{AppState, ObserverLimits};
use canvas_core::{CanvasConfig, ManualClock};
use canvas_test_utils::fixtures;

/// Application state over in-memory backends and a manual clock.
pub struct TestCanvas {
    pub state: AppState,
    pub clock: ManualClock,
}

pub fn test_canvas(canvas: CanvasConfig, limits: ObserverLimits) -> TestCanvas {
    let clock = fixtures::manual_clock(0);
    let (store, directory) = fixtures::memory_backends();
    let state = AppState::new(store, directory, Arc::new(clock.clone()), canvas, limits);
    TestCanvas { state, clock }
}

/// 1000-cell grid, ten-second cooldown, default observer limits.
pub fn small_test_canvas() -> TestCanvas {
    test_canvas(fixtures::small_canvas(), ObserverLimits::default())
}

pub async fn register(registry: &AgentRegistry, name: &str, color: &str) -> RegisteredAgent {
    registry
        .register(RegisterAgentRequest {
            name: name.to_string(),
            color: Some(color.to_string()),
        })
        .await
        .expect("registration should succeed")
}
