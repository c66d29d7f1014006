//! WebSocket Observer Transport
//!
//! Upgrades `GET /api/v1/stream` to a WebSocket and forwards the events of
//! one [`Subscription`] as JSON text frames.
//!
//! ## Protocol
//!
//! 1. The subscription slot is claimed before the upgrade; a full stream
//!    answers 503 with `Retry-After` and never upgrades.
//! 2. Server sends `Connected` with the live viewer count.
//! 3. Server streams `CellChanged` and periodic `Heartbeat` events. Each
//!    heartbeat is paired with a ping frame.
//! 4. A client that sends nothing (not even a pong) for two heartbeat
//!    intervals is treated as half-open and closed.
//! 5. The stream ends with `Expired` or `Closed`, then a close frame.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    Extension,
    http::HeaderMap,
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::broadcaster::{Broadcaster, Subscription};
use crate::error::ApiResult;
use crate::events::ObserverEvent;
use crate::middleware::ClientIpSource;

/// Observer stream upgrade handler.
#[utoipa::path(
    get,
    path = "/api/v1/stream",
    tag = "Stream",
    responses(
        (status = 101, description = "Switching to the observer WebSocket", body = ObserverEvent),
        (status = 503, description = "Observer capacity or per-origin limit reached", body = crate::error::ApiError),
    ),
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(broadcaster): State<Arc<Broadcaster>>,
    source: Option<Extension<ClientIpSource>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let source = source.map(|Extension(source)| source).unwrap_or_default();
    let origin = source.resolve(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    let subscription = broadcaster.subscribe(origin)?;
    let heartbeat = broadcaster.limits().heartbeat;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, subscription, heartbeat)))
}

/// Runs for the lifetime of one observer connection.
async fn handle_socket(socket: WebSocket, mut subscription: Subscription, heartbeat: Duration) {
    let id = subscription.id();
    let origin = subscription.origin();
    info!(subscription = id, %origin, "observer connected");

    let (mut sender, mut receiver) = socket.split();

    // Milliseconds since `opened` at which the client was last heard from.
    let opened = Instant::now();
    let last_seen = Arc::new(AtomicU64::new(0));

    let seen = Arc::clone(&last_seen);
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            seen.store(opened.elapsed().as_millis() as u64, Ordering::Relaxed);
            match msg {
                Ok(Message::Close(_)) => {
                    debug!(subscription = id, "Client sent close frame");
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Text(_)) | Ok(Message::Binary(_)) => {
                    debug!(subscription = id, "Ignoring client data frame");
                }
                Err(e) => {
                    warn!(subscription = id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    let idle_limit = heartbeat.saturating_mul(2).as_millis() as u64;

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    // Dropped by the broadcaster (slow consumer) or shut down.
                    let closed = ObserverEvent::Closed {
                        reason: "subscription dropped by server".to_string(),
                    };
                    let _ = send_event(&mut sender, &closed).await;
                    break;
                };

                if let ObserverEvent::Heartbeat { .. } = event {
                    let idle = (opened.elapsed().as_millis() as u64)
                        .saturating_sub(last_seen.load(Ordering::Relaxed));
                    if idle > idle_limit {
                        warn!(subscription = id, idle_ms = idle, "observer half-open, closing");
                        break;
                    }
                    if sender.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        break;
                    }
                }

                if let Err(e) = send_event(&mut sender, &event).await {
                    debug!(subscription = id, error = %e, "Failed to send event, closing connection");
                    break;
                }
                if event.is_terminal() {
                    break;
                }
            }

            _ = &mut recv_task => {
                debug!(subscription = id, "Receiver task finished");
                break;
            }
        }
    }

    recv_task.abort();
    subscription.unsubscribe();
    let _ = sender.send(Message::Close(None)).await;

    info!(subscription = id, %origin, "observer disconnected");
}

/// Serialize an event to JSON and send it as a text message.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ObserverEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(|e| {
        error!(error = %e, "Failed to serialize event");
        axum::Error::new(e)
    })?;

    sender.send(Message::Text(json.into())).await
}
