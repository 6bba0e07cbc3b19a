//! Stream Relay Integration Tests
//!
//! Tests the full flow from an in-process fake upstream WebSocket,
//! through the ingestor and cache, to downstream relay clients.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use binance_mirror::domain::cache::{MarketCache, SharedMarketCache};
use binance_mirror::{
    BackoffConfig, MirrorState, StreamConfig, StreamEvent, StreamIngestor, router,
};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ACK_1: &str = r#"{"result": null, "id": 1}"#;
const ACK_2: &str = r#"{"result": null, "id": 2}"#;

// =============================================================================
// Fake Upstream Stream
// =============================================================================

#[derive(Clone)]
struct FakeFeed {
    /// Frames pushed by the test, forwarded to every connected socket.
    frames: broadcast::Sender<String>,
    /// Subscription requests received, across all connections.
    subscriptions: Arc<parking_lot::Mutex<Vec<String>>>,
    /// Close each connection right after its first forwarded frame.
    drop_after_send: Arc<AtomicBool>,
}

impl FakeFeed {
    fn new() -> Self {
        Self {
            frames: broadcast::channel(16).0,
            subscriptions: Arc::new(parking_lot::Mutex::new(Vec::new())),
            drop_after_send: Arc::new(AtomicBool::new(false)),
        }
    }
}

async fn feed_handler(ws: WebSocketUpgrade, State(feed): State<FakeFeed>) -> Response {
    ws.on_upgrade(move |socket| serve_feed(socket, feed))
}

async fn serve_feed(mut socket: WebSocket, feed: FakeFeed) {
    let mut rx = feed.frames.subscribe();
    loop {
        tokio::select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(AxumMessage::Text(text))) => {
                    feed.subscriptions.lock().push(text.to_string());
                }
                Some(Ok(_)) => {}
                _ => return,
            },
            frame = rx.recv() => match frame {
                Ok(frame) => {
                    if socket.send(AxumMessage::Text(frame.into())).await.is_err() {
                        return;
                    }
                    if feed.drop_after_send.load(Ordering::Relaxed) {
                        return;
                    }
                }
                Err(_) => return,
            },
        }
    }
}

/// Bind the fake feed on an ephemeral port and return its ws:// URL.
async fn start_feed(feed: FakeFeed) -> String {
    let app = Router::new()
        .route("/ws", get(feed_handler))
        .with_state(feed);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("ws://{addr}/ws")
}

// =============================================================================
// Helpers
// =============================================================================

fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        multiplier: 1.5,
        jitter: 0.0,
        max_attempts: 0,
    }
}

/// Spawn an ingestor against the fake feed.
fn spawn_ingestor(
    url: String,
    cache: SharedMarketCache,
) -> (mpsc::Receiver<StreamEvent>, CancellationToken) {
    let (event_tx, event_rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let ingestor = Arc::new(StreamIngestor::new(
        StreamConfig {
            url,
            subscriptions: vec!["btcusdt@trade".to_string(), "btcusdt@depth@100ms".to_string()],
            backoff: fast_backoff(),
        },
        cache,
        Arc::new(binance_mirror::IngestState::new()),
        event_tx,
        cancel.clone(),
    ));
    tokio::spawn(async move {
        let _ = ingestor.run().await;
    });
    (event_rx, cancel)
}

/// Bind the relay server over `cache` and return its address.
async fn start_relay_server(cache: SharedMarketCache) -> String {
    let app = router(MirrorState::new(
        cache,
        HashSet::new(),
        Arc::new(AtomicI32::new(0)),
    ));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

async fn connect_client(url: &str) -> WsClient {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Next text frame from the client side, bounded by a timeout.
async fn next_text(ws: &mut WsClient) -> String {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return text.to_string(),
                Some(Ok(_)) => {}
                other => panic!("stream ended unexpectedly: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

/// Send the ready message and consume the two synthetic acks.
async fn handshake(ws: &mut WsClient) {
    ws.send(WsMessage::Text(
        r#"{"method": "SUBSCRIBE", "params": ["btcusdt@trade"], "id": 1}"#
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    assert_eq!(next_text(ws).await, ACK_1);
    assert_eq!(next_text(ws).await, ACK_2);
}

async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within deadline");
}

// =============================================================================
// Ingestor Tests
// =============================================================================

#[tokio::test]
async fn ingestor_subscribes_and_publishes_frames() {
    let feed = FakeFeed::new();
    let url = start_feed(feed.clone()).await;
    let cache = Arc::new(MarketCache::new());
    let (_event_rx, _cancel) = spawn_ingestor(url, Arc::clone(&cache));

    // The fixed subscription requests arrive once, in wire format.
    let subscriptions = Arc::clone(&feed.subscriptions);
    wait_until(move || subscriptions.lock().len() >= 2).await;
    let received = feed.subscriptions.lock().clone();
    assert!(received.contains(
        &r#"{"method": "SUBSCRIBE", "params": ["btcusdt@trade"], "id": 1}"#.to_string()
    ));
    assert!(received.contains(
        &r#"{"method": "SUBSCRIBE", "params": ["btcusdt@depth@100ms"], "id": 2}"#.to_string()
    ));

    // A frame pushed upstream lands in the frame slot verbatim.
    let payload = r#"{"e":"trade","s":"BTCUSDT","p":"100.0"}"#;
    for _ in 0..200 {
        let _ = feed.frames.send(payload.to_string());
        if cache.frame_version() >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let frame = cache.read_frame().expect("no frame published");
    assert_eq!(&*frame.payload, payload);
}

#[tokio::test]
async fn ingestor_reconnects_after_upstream_close() {
    let feed = FakeFeed::new();
    feed.drop_after_send.store(true, Ordering::Relaxed);
    let url = start_feed(feed.clone()).await;
    let cache = Arc::new(MarketCache::new());
    let (_event_rx, _cancel) = spawn_ingestor(url, Arc::clone(&cache));

    let subscriptions = Arc::clone(&feed.subscriptions);
    wait_until(move || subscriptions.lock().len() >= 2).await;

    // First frame is forwarded, then the upstream drops the connection.
    for _ in 0..200 {
        let _ = feed.frames.send("first".to_string());
        if cache.frame_version() >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(cache.frame_version() >= 1);

    // The ingestor reconnects and resubscribes on its own.
    let subscriptions = Arc::clone(&feed.subscriptions);
    wait_until(move || subscriptions.lock().len() >= 4).await;

    // The slot keeps moving on the new connection; the old frame stayed
    // available throughout the outage.
    let before = cache.frame_version();
    for _ in 0..200 {
        let _ = feed.frames.send("second".to_string());
        if cache.frame_version() > before {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let frame = cache.read_frame().expect("no frame after reconnect");
    assert_eq!(&*frame.payload, "second");
}

// =============================================================================
// Relay Tests
// =============================================================================

#[tokio::test]
async fn session_receives_acks_then_current_frame() {
    let cache = Arc::new(MarketCache::new());
    cache.publish_frame("A");

    let url = start_relay_server(Arc::clone(&cache)).await;
    let mut client = connect_client(&url).await;

    // Acks arrive only after the client's first message.
    handshake(&mut client).await;

    // last_observed_version starts at 0, so the pre-existing frame is
    // forwarded on the first observation.
    assert_eq!(next_text(&mut client).await, "A");
}

#[tokio::test]
async fn intermediate_frames_are_coalesced() {
    let cache = Arc::new(MarketCache::new());
    let url = start_relay_server(Arc::clone(&cache)).await;

    let mut client = connect_client(&url).await;
    handshake(&mut client).await;

    cache.publish_frame("A");
    assert_eq!(next_text(&mut client).await, "A");

    // Published back-to-back with no await point in between: on the
    // test's single-threaded runtime the session cannot observe "B"
    // before "C" exists, so it must skip straight to "C".
    cache.publish_frame("B");
    cache.publish_frame("C");

    assert_eq!(next_text(&mut client).await, "C");

    // The session keeps following later versions.
    cache.publish_frame("D");
    assert_eq!(next_text(&mut client).await, "D");
}

#[tokio::test]
async fn sessions_are_independent() {
    let cache = Arc::new(MarketCache::new());
    let url = start_relay_server(Arc::clone(&cache)).await;

    let mut first = connect_client(&url).await;
    let mut second = connect_client(&url).await;
    handshake(&mut first).await;
    handshake(&mut second).await;

    // Both sessions observe the same published frame exactly once.
    cache.publish_frame("X");
    assert_eq!(next_text(&mut first).await, "X");
    assert_eq!(next_text(&mut second).await, "X");

    // Closing one session does not interrupt the other.
    first.close(None).await.unwrap();

    cache.publish_frame("Y");
    assert_eq!(next_text(&mut second).await, "Y");
}

#[tokio::test]
async fn client_that_disconnects_before_ready_is_torn_down() {
    let cache = Arc::new(MarketCache::new());
    let url = start_relay_server(Arc::clone(&cache)).await;

    // Connect and close without ever sending the ready message.
    let mut client = connect_client(&url).await;
    client.close(None).await.unwrap();

    // A fresh session on the same server still works.
    cache.publish_frame("A");
    let mut client = connect_client(&url).await;
    handshake(&mut client).await;
    assert_eq!(next_text(&mut client).await, "A");
}
