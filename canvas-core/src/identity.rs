//! Identity and time types for canvas entities

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use uuid::Uuid;

/// Agent identifier using UUIDv7 for timestamp-sortable IDs.
pub type AgentId = Uuid;

/// Milliseconds since the Unix epoch.
///
/// All canvas timestamps (placement times, cooldown bookkeeping, agent
/// creation) use this representation so that cooldown arithmetic stays
/// integer-exact.
pub type EpochMillis = i64;

/// Generate a new UUIDv7 AgentId (timestamp-sortable).
pub fn new_agent_id() -> AgentId {
    Uuid::now_v7()
}

/// Clock abstraction for cooldown bookkeeping.
///
/// Admission decisions are pure functions of "now", so the clock is injected
/// rather than read from the system inside the controller. Tests use
/// [`ManualClock`] to replay exact timelines.
pub trait Clock: Send + Sync {
    /// Current time as Unix epoch milliseconds.
    fn now_millis(&self) -> EpochMillis;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> EpochMillis {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for deterministic tests and replays.
///
/// Cloning shares the underlying instant, so a test can hold one handle and
/// advance the clock seen by a controller holding another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: EpochMillis) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, now: EpochMillis) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move forward by `delta` milliseconds.
    pub fn advance(&self, delta: EpochMillis) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> EpochMillis {
        self.now.load(Ordering::SeqCst)
    }
}
