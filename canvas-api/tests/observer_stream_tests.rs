//! Observer stream tests: subscription caps on the broadcaster and a live
//! WebSocket round trip against a bound server.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use canvas_api::{create_api_router, ApiConfig, ObserverEvent, ObserverLimits, SubscribeError};
use canvas_core::PlacementRequest;
use canvas_test_utils::fixtures;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

#[path = "support/app.rs"]
mod test_app_support;
use test_app_support::{register, test_canvas, TestCanvas};

fn limits(max_connections: usize, max_per_origin: usize) -> ObserverLimits {
    ObserverLimits {
        max_connections,
        max_per_origin,
        ..ObserverLimits::default()
    }
}

#[test]
fn per_origin_cap_releases_on_close() {
    let canvas = test_canvas(fixtures::small_canvas(), limits(100, 2));
    let broadcaster = &canvas.state.broadcaster;
    let origin: IpAddr = "192.0.2.7".parse().expect("ip");

    let first = broadcaster.subscribe(origin).expect("first");
    let _second = broadcaster.subscribe(origin).expect("second");

    match broadcaster.subscribe(origin) {
        Err(SubscribeError::PerOriginLimitExceeded { max, .. }) => assert_eq!(max, 2),
        other => panic!("expected PerOriginLimitExceeded, got {:?}", other.map(|s| s.id())),
    }

    // Another origin is unaffected.
    assert!(broadcaster.subscribe("192.0.2.8".parse().expect("ip")).is_ok());

    drop(first);
    assert_eq!(broadcaster.count_for(origin), 1);
    assert!(broadcaster.subscribe(origin).is_ok());
}

async fn serve(canvas: &TestCanvas) -> SocketAddr {
    let config = ApiConfig {
        rate_limit_enabled: false,
        ..ApiConfig::default()
    };
    let app = create_api_router(canvas.state.clone(), &config).expect("router");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    addr
}

async fn next_event<S>(stream: &mut S) -> ObserverEvent
where
    S: futures_util::Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("event within timeout")
            .expect("stream open")
            .expect("frame");
        if message.is_text() {
            let text = message.to_text().expect("utf-8");
            return serde_json::from_str(text).expect("observer event json");
        }
    }
}

#[tokio::test]
async fn websocket_receives_cell_changes() {
    let canvas = test_canvas(fixtures::small_canvas(), limits(100, 1));
    let addr = serve(&canvas).await;
    let url = format!("ws://{}/api/v1/stream", addr);

    let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .expect("connect");

    match next_event(&mut socket).await {
        ObserverEvent::Connected {
            live_viewer_count, ..
        } => assert_eq!(live_viewer_count, 1),
        other => panic!("expected Connected, got {:?}", other),
    }

    // Same origin is now at its cap of one; the upgrade is refused.
    match tokio_tungstenite::connect_async(url.as_str()).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 503);
            assert_eq!(
                response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok()),
                Some("30")
            );
        }
        Ok(_) => panic!("second observer from one origin should be refused"),
        Err(other) => panic!("unexpected error: {}", other),
    }

    let agent = register(&canvas.state.registry, "A", "#800080").await;
    canvas
        .state
        .controller
        .place(PlacementRequest::new(&agent.credential, 8, 9, None))
        .await
        .expect("placement");

    match next_event(&mut socket).await {
        ObserverEvent::CellChanged(change) => {
            assert_eq!((change.x, change.y), (8, 9));
            assert_eq!(change.writer_name, "A");
            assert_eq!(change.color, fixtures::color("#800080"));
        }
        other => panic!("expected CellChanged, got {:?}", other),
    }

    canvas.state.broadcaster.shutdown();
    match next_event(&mut socket).await {
        ObserverEvent::Closed { .. } => {}
        other => panic!("expected Closed, got {:?}", other),
    }
}

#[tokio::test]
async fn forwarded_for_does_not_bypass_per_origin_cap() {
    let canvas = test_canvas(fixtures::small_canvas(), limits(100, 1));
    let addr = serve(&canvas).await;
    let url = format!("ws://{}/api/v1/stream", addr);

    let claiming = |forwarded_for: &'static str| {
        let mut request = url.as_str().into_client_request().expect("client request");
        request.headers_mut().insert(
            "x-forwarded-for",
            tungstenite::http::HeaderValue::from_static(forwarded_for),
        );
        request
    };

    let (_first, _) = tokio_tungstenite::connect_async(claiming("203.0.113.1"))
        .await
        .expect("connect");

    match tokio_tungstenite::connect_async(claiming("203.0.113.2")).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 503),
        Ok(_) => panic!("a new X-Forwarded-For value must not open a second slot"),
        Err(other) => panic!("unexpected error: {}", other),
    }
    let loopback: IpAddr = "127.0.0.1".parse().expect("ip");
    assert_eq!(canvas.state.broadcaster.count_for(loopback), 1);
}

#[tokio::test]
async fn silent_observer_is_closed_as_half_open() {
    let limits = ObserverLimits {
        heartbeat: Duration::from_millis(100),
        ..limits(100, 4)
    };
    let canvas = test_canvas(fixtures::small_canvas(), limits);
    let broadcaster = canvas.state.broadcaster.clone();
    let maintenance = broadcaster.spawn_maintenance();
    let addr = serve(&canvas).await;
    let url = format!("ws://{}/api/v1/stream", addr);

    let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .expect("connect");
    assert_eq!(broadcaster.count(), 1);

    // The client never polls its socket, so no pong ever goes back.
    let deadline = Instant::now() + Duration::from_secs(5);
    while broadcaster.count() > 0 {
        assert!(Instant::now() < deadline, "half-open observer was never reaped");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = socket.next().await {
            match frame {
                Ok(tungstenite::Message::Close(_)) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "server should have closed the socket");
    assert_eq!(broadcaster.count(), 0);

    broadcaster.shutdown();
    maintenance.await.expect("maintenance task");
}
