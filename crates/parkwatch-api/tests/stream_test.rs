// Integration tests for `StreamClient` against an in-process
// tokio-tungstenite server: connect/send semantics, reconnect budget,
// and disconnect cancellation.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use parkwatch_api::event::InboundEvent;
use parkwatch_api::stream::{StreamClient, StreamConfig, StreamState};

// ── Helpers ─────────────────────────────────────────────────────────

/// Bind a listener on an ephemeral port and return it with its ws:// URL.
async fn bind() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = Url::parse(&format!("ws://{addr}/stream")).unwrap();
    (listener, url)
}

/// Stream config with test-friendly backoff timing.
fn fast_config(url: Url) -> StreamConfig {
    let mut config = StreamConfig::new(url);
    config.base_delay = Duration::from_millis(20);
    config
}

async fn accept_ws(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _peer) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

const CAPACITY_EVENT: &str =
    r#"{"type":"capacity_update","total_slots":4,"occupied":1,"empty":3}"#;
const PLATE_EVENT: &str =
    r#"{"type":"plate_detection","timestamp":1.0,"frame_number":9,"plates":[]}"#;

// ── Connect ─────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_rejects_when_backend_is_down() {
    // Bind then drop so the port is known-dead.
    let (listener, url) = bind().await;
    drop(listener);

    let mut client = StreamClient::new(fast_config(url));
    let result = client.connect().await;

    assert!(result.is_err());
    assert!(!client.is_connected());
    assert_eq!(*client.state().borrow(), StreamState::Closed);
}

#[tokio::test]
async fn connect_resolves_once_open() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let _ws = accept_ws(&listener).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut client = StreamClient::new(fast_config(url));
    client.connect().await.unwrap();

    assert!(client.is_connected());
    assert_eq!(*client.state().borrow(), StreamState::Open);
    client.disconnect();
}

// ── Inbound delivery ────────────────────────────────────────────────

#[tokio::test]
async fn events_are_delivered_in_order_and_parse_errors_are_skipped() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        ws.send(Message::text(CAPACITY_EVENT)).await.unwrap();
        // Malformed payloads must be dropped without closing the stream.
        ws.send(Message::text("{not json")).await.unwrap();
        ws.send(Message::text(PLATE_EVENT)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut client = StreamClient::new(fast_config(url));
    let mut events = client.events();
    client.connect().await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(*first, InboundEvent::CapacityUpdate(_)));

    let second = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(*second, InboundEvent::PlateDetection(_)));

    // The malformed frame neither surfaced nor killed the connection.
    assert!(client.is_connected());
    client.disconnect();
}

// ── Outbound delivery ───────────────────────────────────────────────

#[tokio::test]
async fn frames_and_control_messages_reach_the_backend() {
    let (listener, url) = bind().await;
    let (received_tx, mut received_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let _ = received_tx.send(text.to_string());
            }
        }
    });

    let mut client = StreamClient::new(fast_config(url));
    client.connect().await.unwrap();

    let mut metadata = serde_json::Map::new();
    metadata.insert("camera_id".into(), "lot-b-east".into());
    client.send_frame("aGVsbG8=", Some(metadata));
    client.reset();
    client.request_stats();

    let frame = tokio::time::timeout(Duration::from_secs(2), received_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let frame: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(frame["data"], "aGVsbG8=");
    assert_eq!(frame["camera_id"], "lot-b-east");

    let reset = tokio::time::timeout(Duration::from_secs(2), received_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reset, r#"{"type":"reset"}"#);

    let stats = tokio::time::timeout(Duration::from_secs(2), received_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats, r#"{"type":"stats"}"#);

    client.disconnect();
}

// ── Reconnection ────────────────────────────────────────────────────

#[tokio::test]
async fn reconnect_resumes_event_delivery() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        // First connection: handshake, then drop immediately.
        let ws = accept_ws(&listener).await;
        drop(ws);
        // Second connection: deliver an event and stay up.
        let mut ws = accept_ws(&listener).await;
        ws.send(Message::text(CAPACITY_EVENT)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut client = StreamClient::new(fast_config(url));
    let mut events = client.events();
    client.connect().await.unwrap();

    // The subscription from before the drop survives the reconnect.
    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(*event, InboundEvent::CapacityUpdate(_)));
    assert!(client.is_connected());
    client.disconnect();
}

#[tokio::test]
async fn reconnect_budget_is_bounded() {
    let (listener, url) = bind().await;
    let accepts = Arc::new(AtomicUsize::new(0));
    let server_accepts = Arc::clone(&accepts);
    tokio::spawn(async move {
        // First connection completes the handshake then drops; every
        // later dial is refused before the handshake, so each
        // reconnect attempt fails and consumes budget.
        let ws = accept_ws(&listener).await;
        server_accepts.fetch_add(1, Ordering::SeqCst);
        drop(ws);
        loop {
            let (stream, _peer) = listener.accept().await.unwrap();
            server_accepts.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    let mut client = StreamClient::new(fast_config(url));
    client.connect().await.unwrap();

    // Backoff at 20ms units: attempts land at ~20, 40, 60ms. Give the
    // loop ample time to prove it stops at the budget.
    tokio::time::sleep(Duration::from_millis(500)).await;

    // 1 initial connection + exactly max_reconnect_attempts redials.
    assert_eq!(accepts.load(Ordering::SeqCst), 4);
    assert!(!client.is_connected());
    assert_eq!(*client.state().borrow(), StreamState::Closed);

    // `closed()` resolves once the task gives up.
    tokio::time::timeout(Duration::from_secs(1), client.closed())
        .await
        .unwrap();

    // And it stays quiet.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn disconnect_cancels_an_armed_backoff_timer() {
    let (listener, url) = bind().await;
    let accepts = Arc::new(AtomicUsize::new(0));
    let server_accepts = Arc::clone(&accepts);
    tokio::spawn(async move {
        loop {
            let ws = accept_ws(&listener).await;
            server_accepts.fetch_add(1, Ordering::SeqCst);
            drop(ws);
        }
    });

    let mut config = fast_config(url);
    config.base_delay = Duration::from_millis(300);
    let mut client = StreamClient::new(config);
    let mut state = client.state();

    client.connect().await.unwrap();

    // Wait for the unsolicited close; the 300ms backoff timer is now armed.
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == StreamState::Closed),
    )
    .await
    .unwrap()
    .unwrap();

    client.disconnect();
    tokio::time::sleep(Duration::from_millis(600)).await;

    // The armed timer never produced a reconnect.
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn replacing_a_stalled_connection_keeps_the_live_state() {
    let (listener, url) = bind().await;
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        // First connection: handshake, then hold the socket without
        // ever reading, so the client's writer wedges on backpressure.
        let first = accept_ws(&listener).await;
        // Second connection: serve events normally.
        let mut second = accept_ws(&listener).await;
        second.send(Message::text(CAPACITY_EVENT)).await.unwrap();
        let _ = release_rx.await;
        drop(first);
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut client = StreamClient::new(fast_config(url));
    let mut events = client.events();
    client.connect().await.unwrap();

    // Wedge the first connection's writer against the non-reading server.
    let payload = "x".repeat(1 << 20);
    for _ in 0..64 {
        client.send_frame(payload.clone(), None);
    }

    client.connect().await.unwrap();
    assert!(client.is_connected());

    // The second connection is demonstrably alive.
    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(*event, InboundEvent::CapacityUpdate(_)));

    // Let the first connection's task finish dying, then confirm it
    // did not clobber the live connection's state.
    let _ = release_tx.send(());
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(client.is_connected());
    assert_eq!(*client.state().borrow(), StreamState::Open);

    client.disconnect();
}

#[tokio::test]
async fn second_connect_replaces_the_first_connection() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        loop {
            let mut ws = accept_ws(&listener).await;
            tokio::spawn(async move {
                while ws.next().await.is_some() {}
            });
        }
    });

    let mut client = StreamClient::new(fast_config(url));
    let mut state = client.state();
    client.connect().await.unwrap();
    client.connect().await.unwrap();

    assert!(client.is_connected());

    client.disconnect();
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == StreamState::Closed),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(!client.is_connected());
}
