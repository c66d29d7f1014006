//! Fan-out Broadcaster
//!
//! Owns the set of live observer subscriptions and pushes committed cell
//! changes to every one of them. Transport-independent: a subscriber is a
//! bounded queue, and the WebSocket handler in [`crate::ws`] drains it.
//!
//! ## Guarantees
//!
//! - Global and per-origin subscription caps are checked and claimed under
//!   one lock, so concurrent subscribes never overshoot either cap.
//! - `publish` never blocks: each subscriber gets a `try_send`, and a full or
//!   closed queue removes only that subscriber.
//! - No lock is held across I/O or an await point.
//! - Subscriptions are closed after `max_lifetime`; the maintenance task
//!   emits heartbeats and reaps expired or dead subscribers.

use canvas_core::{CellChange, Clock, EpochMillis};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ObserverLimits;
use crate::error::{ApiError, ErrorCode};
use crate::events::ObserverEvent;
use crate::telemetry::metrics::with_metrics;

/// Suggested client back-off when the stream is full.
pub const SUBSCRIBE_RETRY_AFTER_SECS: u64 = 30;

/// Identifier of one subscription, unique per broadcaster.
pub type SubscriptionId = u64;

// ============================================================================
// ERRORS
// ============================================================================

/// Why a subscription was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    #[error("observer capacity of {max} reached")]
    CapacityExceeded { max: usize },

    #[error("origin {origin} already holds {max} observers")]
    PerOriginLimitExceeded { origin: IpAddr, max: usize },
}

impl SubscribeError {
    pub fn reason(&self) -> &'static str {
        match self {
            SubscribeError::CapacityExceeded { .. } => "capacity_exceeded",
            SubscribeError::PerOriginLimitExceeded { .. } => "per_origin_limit",
        }
    }
}

impl From<SubscribeError> for ApiError {
    fn from(err: SubscribeError) -> Self {
        let (code, max) = match err {
            SubscribeError::CapacityExceeded { max } => (ErrorCode::CapacityExceeded, max),
            SubscribeError::PerOriginLimitExceeded { max, .. } => {
                (ErrorCode::PerOriginLimitExceeded, max)
            }
        };
        ApiError::new(code, err.to_string())
            .with_details(serde_json::json!({ "max": max }))
            .with_retry_after(SUBSCRIBE_RETRY_AFTER_SECS)
    }
}

// ============================================================================
// SUBSCRIPTION HANDLE
// ============================================================================

/// A live subscription. Dropping it releases the slot.
pub struct Subscription {
    id: SubscriptionId,
    origin: IpAddr,
    connected_at: EpochMillis,
    events: mpsc::Receiver<ObserverEvent>,
    broadcaster: Weak<Broadcaster>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn origin(&self) -> IpAddr {
        self.origin
    }

    pub fn connected_at(&self) -> EpochMillis {
        self.connected_at
    }

    /// Next queued event. `None` once the broadcaster has dropped this
    /// subscriber and the queue is drained.
    pub async fn recv(&mut self) -> Option<ObserverEvent> {
        self.events.recv().await
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<ObserverEvent> {
        self.events.try_recv().ok()
    }

    /// Release the slot now. Safe to call repeatedly.
    pub fn unsubscribe(&self) -> bool {
        match self.broadcaster.upgrade() {
            Some(broadcaster) => broadcaster.unsubscribe(self.id),
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

struct Subscriber {
    origin: IpAddr,
    connected_at: EpochMillis,
    tx: mpsc::Sender<ObserverEvent>,
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<SubscriptionId, Subscriber>,
    per_origin: HashMap<IpAddr, usize>,
}

impl Registry {
    fn remove(&mut self, id: SubscriptionId) -> Option<Subscriber> {
        let subscriber = self.subscribers.remove(&id)?;
        if let Some(count) = self.per_origin.get_mut(&subscriber.origin) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_origin.remove(&subscriber.origin);
            }
        }
        Some(subscriber)
    }

    /// Offer `event` to every subscriber, dropping those that cannot take it.
    fn offer_all(&mut self, event: &ObserverEvent) -> (usize, Vec<(SubscriptionId, &'static str)>) {
        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, subscriber) in &self.subscribers {
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => failed.push((*id, "slow_consumer")),
                Err(mpsc::error::TrySendError::Closed(_)) => failed.push((*id, "disconnected")),
            }
        }
        for (id, _) in &failed {
            self.remove(*id);
        }
        (delivered, failed)
    }
}

// ============================================================================
// BROADCASTER
// ============================================================================

/// Single owned fan-out service, shared by handle.
pub struct Broadcaster {
    limits: ObserverLimits,
    clock: Arc<dyn Clock>,
    registry: Mutex<Registry>,
    activity: Mutex<VecDeque<CellChange>>,
    next_id: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl Broadcaster {
    pub fn new(limits: ObserverLimits, clock: Arc<dyn Clock>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            activity: Mutex::new(VecDeque::with_capacity(limits.activity_capacity)),
            limits,
            clock,
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            shutdown,
        })
    }

    pub fn limits(&self) -> &ObserverLimits {
        &self.limits
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn after_removal(&self, removed: &[(SubscriptionId, &'static str)]) {
        if removed.is_empty() {
            return;
        }
        let live = self.count();
        with_metrics(|m| {
            m.set_observers(live);
            for (_, reason) in removed {
                m.record_observer_rejection(reason);
            }
        });
        for (id, reason) in removed {
            debug!(subscription = id, reason, "observer dropped");
        }
    }

    /// Register a new observer from `origin`.
    pub fn subscribe(self: &Arc<Self>, origin: IpAddr) -> Result<Subscription, SubscribeError> {
        let connected_at = self.clock.now_millis();
        let (tx, events) = mpsc::channel(self.limits.queue_depth);

        let (id, live) = {
            let mut registry = self.registry();
            if registry.subscribers.len() >= self.limits.max_connections {
                drop(registry);
                return Err(self.refuse(SubscribeError::CapacityExceeded {
                    max: self.limits.max_connections,
                }));
            }
            let from_origin = registry.per_origin.get(&origin).copied().unwrap_or(0);
            if from_origin >= self.limits.max_per_origin {
                drop(registry);
                return Err(self.refuse(SubscribeError::PerOriginLimitExceeded {
                    origin,
                    max: self.limits.max_per_origin,
                }));
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let live = registry.subscribers.len() + 1;
            // Fresh queue with depth >= 1, so this cannot fail.
            let _ = tx.try_send(ObserverEvent::Connected {
                live_viewer_count: live,
                max_lifetime_secs: self.limits.max_lifetime.as_secs(),
            });
            registry.subscribers.insert(
                id,
                Subscriber {
                    origin,
                    connected_at,
                    tx,
                },
            );
            *registry.per_origin.entry(origin).or_insert(0) += 1;
            (id, live)
        };

        with_metrics(|m| m.set_observers(live));
        info!(subscription = id, %origin, live, "observer subscribed");

        Ok(Subscription {
            id,
            origin,
            connected_at,
            events,
            broadcaster: Arc::downgrade(self),
        })
    }

    fn refuse(&self, err: SubscribeError) -> SubscribeError {
        with_metrics(|m| m.record_observer_rejection(err.reason()));
        info!(error = %err, "observer refused");
        err
    }

    /// Remove a subscription. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let (removed, live) = {
            let mut registry = self.registry();
            let removed = registry.remove(id).is_some();
            (removed, registry.subscribers.len())
        };
        if removed {
            with_metrics(|m| m.set_observers(live));
            info!(subscription = id, live, "observer unsubscribed");
        }
        removed
    }

    /// Live subscriptions.
    pub fn count(&self) -> usize {
        self.registry().subscribers.len()
    }

    /// Live subscriptions from one origin.
    pub fn count_for(&self, origin: IpAddr) -> usize {
        self.registry().per_origin.get(&origin).copied().unwrap_or(0)
    }

    /// Push a committed change to every observer.
    ///
    /// Stamps `live_viewer_count`, records the change in the activity ring,
    /// and returns how many subscribers accepted it.
    pub fn publish(&self, mut change: CellChange) -> usize {
        let (delivered, failed) = {
            let mut registry = self.registry();
            change.live_viewer_count = registry.subscribers.len();
            self.record_activity(&change);
            registry.offer_all(&ObserverEvent::CellChanged(change))
        };
        self.after_removal(&failed);
        delivered
    }

    fn record_activity(&self, change: &CellChange) {
        if self.limits.activity_capacity == 0 {
            return;
        }
        let mut activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        while activity.len() >= self.limits.activity_capacity {
            activity.pop_back();
        }
        activity.push_front(change.clone());
    }

    /// Most recent changes, newest first. Best-effort: the ring only holds
    /// what this process published.
    pub fn recent_activity(&self, limit: usize) -> Vec<CellChange> {
        let activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        activity.iter().take(limit).cloned().collect()
    }

    /// Send a liveness signal to every subscriber, dropping dead ones.
    pub fn heartbeat(&self, now: EpochMillis) -> usize {
        let (delivered, failed) = {
            let mut registry = self.registry();
            let event = ObserverEvent::Heartbeat {
                timestamp: now,
                live_viewer_count: registry.subscribers.len(),
            };
            registry.offer_all(&event)
        };
        self.after_removal(&failed);
        delivered
    }

    /// Close every subscription older than the maximum lifetime.
    pub fn reap_expired(&self, now: EpochMillis) -> Vec<SubscriptionId> {
        let max_lifetime_ms = i64::try_from(self.limits.max_lifetime.as_millis()).unwrap_or(i64::MAX);
        let expired: Vec<(SubscriptionId, Subscriber)> = {
            let mut registry = self.registry();
            let ids: Vec<SubscriptionId> = registry
                .subscribers
                .iter()
                .filter(|(_, s)| now.saturating_sub(s.connected_at) >= max_lifetime_ms)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| registry.remove(id).map(|s| (id, s)))
                .collect()
        };

        for (id, subscriber) in &expired {
            let _ = subscriber.tx.try_send(ObserverEvent::Expired {
                reason: "maximum connection lifetime reached".to_string(),
            });
            info!(subscription = id, origin = %subscriber.origin, "observer expired");
        }
        let removed: Vec<(SubscriptionId, &'static str)> =
            expired.iter().map(|(id, _)| (*id, "expired")).collect();
        self.after_removal(&removed);
        removed.into_iter().map(|(id, _)| id).collect()
    }

    /// One maintenance pass: expiry, then heartbeat.
    pub fn tick(&self) {
        let now = self.clock.now_millis();
        self.reap_expired(now);
        self.heartbeat(now);
    }

    /// Spawn the periodic maintenance task. It stops on [`Broadcaster::shutdown`].
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let broadcaster = Arc::clone(self);
        let mut stop = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(broadcaster.limits.heartbeat);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => broadcaster.tick(),
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("broadcaster maintenance stopped");
        })
    }

    /// Stop maintenance and close every subscription.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let drained: Vec<Subscriber> = {
            let mut registry = self.registry();
            registry.per_origin.clear();
            registry.subscribers.drain().map(|(_, s)| s).collect()
        };
        let closed = drained.len();
        for subscriber in drained {
            let _ = subscriber.tx.try_send(ObserverEvent::Closed {
                reason: "server shutting down".to_string(),
            });
        }
        with_metrics(|m| m.set_observers(0));
        if closed > 0 {
            warn!(closed, "broadcaster shut down with live observers");
        }
    }
}
