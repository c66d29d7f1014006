//! Observer Event Types
//!
//! Events pushed to live observers. The broadcaster deals only in these;
//! the WebSocket transport serializes them as tagged JSON text frames.

use canvas_core::{CellChange, EpochMillis};
use serde::{Deserialize, Serialize};

/// Events delivered to an observer subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "type")]
pub enum ObserverEvent {
    /// First event on every subscription.
    Connected {
        live_viewer_count: usize,
        /// Seconds until the server closes this subscription.
        max_lifetime_secs: u64,
    },

    /// A placement was committed.
    CellChanged(CellChange),

    /// Periodic liveness signal.
    Heartbeat {
        timestamp: EpochMillis,
        live_viewer_count: usize,
    },

    /// The subscription reached its maximum lifetime and is being closed.
    Expired { reason: String },

    /// The server is shutting down or dropped this subscriber.
    Closed { reason: String },
}

impl ObserverEvent {
    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            ObserverEvent::Connected { .. } => "Connected",
            ObserverEvent::CellChanged(_) => "CellChanged",
            ObserverEvent::Heartbeat { .. } => "Heartbeat",
            ObserverEvent::Expired { .. } => "Expired",
            ObserverEvent::Closed { .. } => "Closed",
        }
    }

    /// Whether the subscription ends after this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ObserverEvent::Expired { .. } | ObserverEvent::Closed { .. })
    }
}
