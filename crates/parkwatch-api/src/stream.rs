//! Detection stream client with auto-reconnect.
//!
//! Maintains one long-lived WebSocket connection per camera to the
//! detection backend: pushes video frames and control messages out,
//! streams parsed [`InboundEvent`]s back through a
//! [`tokio::sync::broadcast`] channel, and publishes connection state
//! through a [`tokio::sync::watch`] channel. Unsolicited closes trigger
//! reconnection with linear backoff, bounded by an attempt budget.
//!
//! # Example
//!
//! ```rust,ignore
//! use parkwatch_api::stream::{StreamClient, StreamConfig};
//! use url::Url;
//!
//! let url = Url::parse("ws://127.0.0.1:8765/stream/lot-b-east")?;
//! let mut client = StreamClient::new(StreamConfig::new(url));
//! let mut events = client.events();
//!
//! client.connect().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//!
//! client.disconnect();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::event::{ControlMessage, FramePush, InboundEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Channel capacities ───────────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── StreamConfig ─────────────────────────────────────────────────────

/// Connection and reconnection settings for one stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Backend stream endpoint (`ws://` or `wss://`).
    pub url: Url,

    /// Backoff unit: the delay before reconnect attempt `k` is
    /// `base_delay * k`. Default: 2s (so 2s, 4s, 6s).
    pub base_delay: Duration,

    /// Reconnection attempt budget per unsolicited close streak.
    /// A successful open resets the counter. Default: 3.
    pub max_reconnect_attempts: u32,

    /// Outbound channel capacity. Frames are perishable: when the
    /// writer falls behind, new frames are dropped rather than queued.
    pub outbound_buffer: usize,
}

impl StreamConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            base_delay: Duration::from_secs(2),
            max_reconnect_attempts: 3,
            outbound_buffer: 32,
        }
    }
}

// ── StreamState ──────────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

// ── StreamClient ─────────────────────────────────────────────────────

/// Client for one camera's detection stream.
///
/// [`connect`](Self::connect) performs the first transport open inline
/// (resolving once the connection is up, or erroring if it is not),
/// then hands the socket to a background task that reads events,
/// writes outbound frames, and reconnects on unsolicited closes.
pub struct StreamClient {
    config: StreamConfig,
    event_tx: broadcast::Sender<Arc<InboundEvent>>,
    state_tx: watch::Sender<StreamState>,
    /// Current connection generation. A superseded connection's task
    /// may outlive its replacement (a close can be slow), so its state
    /// publishes are tagged and dropped once this moves past them.
    generation: Arc<AtomicU64>,
    conn: Option<ConnHandle>,
}

/// Per-connection plumbing; replaced wholesale on each `connect()`.
struct ConnHandle {
    outbound_tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

impl StreamClient {
    /// Create a client. Does NOT connect — call [`connect`](Self::connect).
    pub fn new(config: StreamConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(StreamState::Idle);
        Self {
            config,
            event_tx,
            state_tx,
            generation: Arc::new(AtomicU64::new(0)),
            conn: None,
        }
    }

    /// Open the stream connection.
    ///
    /// Any prior connection owned by this client is torn down first —
    /// a client never holds two live connections. Resolves once the
    /// transport reports open; errors if the first attempt fails.
    /// Later automatic reconnect failures are swallowed and observable
    /// only through [`state`](Self::state) / [`is_connected`](Self::is_connected).
    pub async fn connect(&mut self) -> Result<(), Error> {
        // Supersede any previous connection before touching the watch:
        // its task may linger in a slow close, and a stale publish
        // must not land on top of this connection's state.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(prev) = self.conn.take() {
            prev.cancel.cancel();
        }

        publish_state(&self.state_tx, StreamState::Connecting);
        tracing::info!(url = %self.config.url, "connecting to detection stream");

        let (socket, _response) = tokio_tungstenite::connect_async(self.config.url.as_str())
            .await
            .map_err(|e| {
                publish_state(&self.state_tx, StreamState::Closed);
                Error::StreamConnect(e.to_string())
            })?;

        tracing::info!("stream connected");
        publish_state(&self.state_tx, StreamState::Open);

        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_buffer);
        self.conn = Some(ConnHandle {
            outbound_tx,
            cancel: cancel.clone(),
        });

        let state = StatePublisher {
            tx: self.state_tx.clone(),
            current: Arc::clone(&self.generation),
            generation,
        };
        tokio::spawn(stream_loop(
            socket,
            self.config.clone(),
            self.event_tx.clone(),
            state,
            outbound_rx,
            cancel,
        ));

        Ok(())
    }

    /// Close the stream and suppress all further reconnect attempts,
    /// including one whose backoff timer is already armed.
    pub fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::info!("disconnecting stream");
            // Supersede first so the task's own final publishes are
            // dropped; Closed is published here, authoritatively.
            self.generation.fetch_add(1, Ordering::SeqCst);
            conn.cancel.cancel();
            publish_state(&self.state_tx, StreamState::Closing);
            publish_state(&self.state_tx, StreamState::Closed);
        }
    }

    /// Get a new broadcast receiver for parsed inbound events.
    ///
    /// Events arrive in transport order. Subscriptions survive
    /// reconnects; a consumer that falls behind receives
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn events(&self) -> broadcast::Receiver<Arc<InboundEvent>> {
        self.event_tx.subscribe()
    }

    /// Subscribe to connection state changes.
    pub fn state(&self) -> watch::Receiver<StreamState> {
        self.state_tx.subscribe()
    }

    /// Resolves once the background connection task has terminated,
    /// whether by [`disconnect`](Self::disconnect) or by exhausting
    /// the reconnect budget. Resolves immediately if the client never
    /// connected. Note that [`StreamState::Closed`] alone is not
    /// terminal: it is also published between reconnect attempts.
    pub async fn closed(&self) {
        if let Some(conn) = &self.conn {
            conn.cancel.cancelled().await;
        }
    }

    /// True iff the transport state is [`StreamState::Open`].
    pub fn is_connected(&self) -> bool {
        matches!(*self.state_tx.borrow(), StreamState::Open)
    }

    /// Push a base64-encoded video frame, with optional metadata fields
    /// flattened into the frame object.
    ///
    /// Frames are perishable: if the stream is not open or the writer
    /// is saturated, the frame is dropped with a warning. Never errors.
    pub fn send_frame(
        &self,
        image_data: impl Into<String>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) {
        let frame = FramePush {
            data: image_data.into(),
            metadata: metadata.unwrap_or_default(),
        };
        match serde_json::to_string(&frame) {
            Ok(json) => self.transmit(Outbound::Text(json), "frame"),
            Err(e) => tracing::warn!(error = %e, "could not serialize frame"),
        }
    }

    /// Push a raw binary frame. Same drop-when-not-open semantics as
    /// [`send_frame`](Self::send_frame).
    pub fn send_binary(&self, bytes: Bytes) {
        self.transmit(Outbound::Binary(bytes), "binary frame");
    }

    /// Fire-and-forget `{ "type": "reset" }`. No-op unless open.
    pub fn reset(&self) {
        self.send_control(ControlMessage::Reset);
    }

    /// Fire-and-forget `{ "type": "stats" }`. No-op unless open.
    pub fn request_stats(&self) {
        self.send_control(ControlMessage::Stats);
    }

    fn send_control(&self, message: ControlMessage) {
        match serde_json::to_string(&message) {
            Ok(json) => self.transmit(Outbound::Text(json), "control message"),
            Err(e) => tracing::warn!(error = %e, "could not serialize control message"),
        }
    }

    fn transmit(&self, outbound: Outbound, kind: &'static str) {
        if !self.is_connected() {
            tracing::warn!(kind, "stream is not open, dropping");
            return;
        }
        let Some(conn) = &self.conn else {
            tracing::warn!(kind, "stream is not open, dropping");
            return;
        };
        if conn.outbound_tx.try_send(outbound).is_err() {
            tracing::warn!(kind, "outbound buffer full, dropping");
        }
    }
}

// ── Outbound messages ────────────────────────────────────────────────

enum Outbound {
    Text(String),
    Binary(Bytes),
}

impl Outbound {
    fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text.into()),
            Self::Binary(bytes) => Message::Binary(bytes),
        }
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: drive the connection → on unsolicited close, backoff →
/// redial. A successful open resets the attempt counter; exhausting the
/// budget stops silently (callers observe via the state watch).
async fn stream_loop(
    socket: WsStream,
    config: StreamConfig,
    event_tx: broadcast::Sender<Arc<InboundEvent>>,
    state: StatePublisher,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    let mut socket = Some(socket);

    loop {
        let ws = match socket.take() {
            Some(ws) => ws,
            None => {
                if attempt >= config.max_reconnect_attempts {
                    tracing::warn!(attempts = attempt, "reconnect budget exhausted, giving up");
                    break;
                }
                attempt += 1;

                let delay = backoff_delay(&config, attempt);
                tracing::info!(
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    attempt,
                    "waiting before reconnect"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }

                state.publish(StreamState::Connecting);
                match tokio_tungstenite::connect_async(config.url.as_str()).await {
                    Ok((ws, _response)) => {
                        tracing::info!(attempt, "stream reconnected");
                        ws
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "reconnect attempt failed");
                        state.publish(StreamState::Closed);
                        continue;
                    }
                }
            }
        };

        attempt = 0;
        state.publish(StreamState::Open);

        match drive_connection(ws, &event_tx, &state, &mut outbound_rx, &cancel).await {
            Disconnect::Requested => break,
            Disconnect::Unsolicited => state.publish(StreamState::Closed),
        }
    }

    state.publish(StreamState::Closed);
    // Signals `StreamClient::closed()` waiters; no-op when the exit
    // was itself caused by cancellation.
    cancel.cancel();
    tracing::debug!("stream loop exiting");
}

enum Disconnect {
    /// `disconnect()` was called — terminal.
    Requested,
    /// The transport dropped on its own — reconnect may follow.
    Unsolicited,
}

/// Drive a single established connection until it drops.
async fn drive_connection(
    ws: WsStream,
    event_tx: &broadcast::Sender<Arc<InboundEvent>>,
    state: &StatePublisher,
    outbound_rx: &mut mpsc::Receiver<Outbound>,
    cancel: &CancellationToken,
) -> Disconnect {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                state.publish(StreamState::Closing);
                let _ = write.close().await;
                return Disconnect::Requested;
            }
            outbound = outbound_rx.recv() => {
                // The sender half lives in the client; None means the
                // client handle was dropped entirely.
                let Some(outbound) = outbound else { return Disconnect::Requested };
                if let Err(e) = write.send(outbound.into_message()).await {
                    tracing::warn!(error = %e, "stream write failed");
                    return Disconnect::Unsolicited;
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => publish_event(text.as_str(), event_tx),
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("stream ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "stream close frame received");
                        } else {
                            tracing::info!("stream close frame received (no payload)");
                        }
                        return Disconnect::Unsolicited;
                    }
                    Some(Ok(_)) => {
                        // Binary, Pong, Frame -- not part of the inbound protocol
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "stream read failed");
                        return Disconnect::Unsolicited;
                    }
                    None => {
                        tracing::info!("stream ended without a close frame");
                        return Disconnect::Unsolicited;
                    }
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Parse an inbound text frame and broadcast it.
///
/// Malformed payloads are logged and dropped; they neither close the
/// connection nor count against the reconnect budget.
fn publish_event(text: &str, event_tx: &broadcast::Sender<Arc<InboundEvent>>) {
    match InboundEvent::from_json(text) {
        Ok(event) => {
            // Ignore send errors -- just means no active subscribers right now
            let _ = event_tx.send(Arc::new(event));
        }
        Err(e) => tracing::debug!(error = %e, "dropping malformed inbound payload"),
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Linear backoff: `delay = base_delay * attempt`.
///
/// With the 2s default this yields 2s, 4s, 6s across the default
/// three-attempt budget.
fn backoff_delay(config: &StreamConfig, attempt: u32) -> Duration {
    config.base_delay * attempt
}

// ── State publishing ─────────────────────────────────────────────────

/// Publishes state on behalf of one connection's background task.
///
/// Tagged with that connection's generation: once the client moves to
/// a newer connection (or disconnects), publishes from this task no
/// longer land. The check runs inside `send_if_modified`, under the
/// watch lock, so a dying task cannot interleave a stale `Closed`
/// between the supersede and the replacement's `Open`.
struct StatePublisher {
    tx: watch::Sender<StreamState>,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl StatePublisher {
    fn publish(&self, state: StreamState) {
        self.tx.send_if_modified(|value| {
            if self.current.load(Ordering::SeqCst) != self.generation {
                tracing::trace!(dropped = ?state, "superseded connection, ignoring state publish");
                return false;
            }
            if *value == state {
                return false;
            }
            tracing::debug!(from = ?value, to = ?state, "stream state changed");
            *value = state;
            true
        });
    }
}

fn publish_state(tx: &watch::Sender<StreamState>, state: StreamState) {
    tx.send_if_modified(|current| {
        if *current == state {
            return false;
        }
        tracing::debug!(from = ?current, to = ?state, "stream state changed");
        *current = state;
        true
    });
}

// ── Tests ────────────────────────────────────────────────────────────
