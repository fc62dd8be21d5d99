//! WebSocket upgrades, connections, and the frame loop.
//!
//! [`WsUpgrade`] performs the RFC 6455 handshake: it validates the
//! `Sec-WebSocket-Key`, optionally checks the request origin against an
//! allow-list, negotiates a subprotocol, computes the accept key (SHA-1 of
//! key + GUID, base64), and answers `101 Switching Protocols`. The hijacked
//! connection then runs a framework-owned read loop that reassembles
//! messages, answers pings, tracks liveness on pongs, and enforces the
//! maximum message size (overruns close with 1009).
//!
//! Outbound traffic goes through a bounded per-connection write queue drained
//! by a dedicated writer task. When the queue is full, sends either wait
//! (`Block`) or are dropped with a warning (`Drop`), per configuration. Reads
//! idle longer than the configured timeout close the connection.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::app::App;
//! use nextrush::ws::WsMessage;
//!
//! let mut app = App::new();
//! app.ws("/chat", |conn, mut incoming| async move {
//!     conn.join("lobby").await;
//!     while let Some(msg) = incoming.recv().await {
//!         if let WsMessage::Text(text) = msg {
//!             conn.rooms().broadcast_to_room("lobby", text, Some(conn.id())).await;
//!         }
//!     }
//! });
//! ```

use std::{
    collections::HashSet,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use futures_util::{FutureExt, SinkExt, StreamExt};
use http::{StatusCode, header};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::protocol::{CloseFrame, Message, Role, WebSocketConfig, frame::coding::CloseCode},
};

use crate::{body::RushBody, context::Context, responder::Responder, types::Response};

pub mod rooms;

pub use rooms::RoomManager;

/// Fixed GUID from RFC 6455 used to derive the accept key.
const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// What to do when a connection's write queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait for queue space; backpressure propagates to the caller.
    #[default]
    Block,
    /// Drop the message and log a warning.
    Drop,
}

/// Connection lifecycle states. Transitions are monotonic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WsState {
    /// Handshake done, frame loop not yet running.
    Connecting = 0,
    /// Frames flowing.
    Open = 1,
    /// Close initiated, awaiting the peer's close.
    Closing = 2,
    /// Terminated.
    Closed = 3,
}

impl WsState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WsState::Connecting,
            1 => WsState::Open,
            2 => WsState::Closing,
            _ => WsState::Closed,
        }
    }
}

/// An inbound data message delivered to the connection handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsMessage {
    /// A complete (reassembled) text message.
    Text(String),
    /// A complete binary message.
    Binary(Bytes),
}

/// Receiver side of the inbound message channel handed to handlers.
pub type WsReceiver = mpsc::Receiver<WsMessage>;

/// Runtime options for a WebSocket endpoint.
#[derive(Clone, Debug)]
pub struct WsRuntimeOptions {
    /// Maximum reassembled message size; overruns close with 1009.
    pub max_message_size: usize,
    /// Origins accepted during the handshake; `None` accepts any.
    pub allowed_origins: Option<Vec<String>>,
    /// Supported subprotocols, negotiated in client preference order.
    pub subprotocols: Vec<String>,
    /// Bounded write-queue depth per connection.
    pub send_queue: usize,
    /// Behavior when the write queue is saturated.
    pub overflow: OverflowPolicy,
    /// Read idle timeout; silent connections are closed.
    pub idle_timeout: Duration,
}

impl Default for WsRuntimeOptions {
    fn default() -> Self {
        Self {
            max_message_size: 1024 * 1024,
            allowed_origins: None,
            subprotocols: Vec::new(),
            send_queue: 64,
            overflow: OverflowPolicy::Block,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

struct ConnInner {
    id: String,
    tx: mpsc::Sender<Message>,
    state: AtomicU8,
    rooms: Mutex<HashSet<String>>,
    registry: Arc<RoomManager>,
    overflow: OverflowPolicy,
    data: Mutex<std::collections::HashMap<String, Value>>,
}

/// Cloneable handle to one WebSocket connection.
///
/// Sends go through the connection's bounded write queue; `send` on a
/// non-open connection is a no-op returning `false`. The set of joined
/// rooms is kept mutually consistent with the room registry.
#[derive(Clone)]
pub struct WsConnection {
    inner: Arc<ConnInner>,
}

impl WsConnection {
    pub(crate) fn new(
        id: String,
        tx: mpsc::Sender<Message>,
        registry: Arc<RoomManager>,
        overflow: OverflowPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                id,
                tx,
                state: AtomicU8::new(WsState::Connecting as u8),
                rooms: Mutex::new(HashSet::new()),
                registry,
                overflow,
                data: Mutex::new(std::collections::HashMap::new()),
            }),
        }
    }

    /// Unique connection id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WsState {
        WsState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Advances the state; transitions never move backwards.
    pub(crate) fn advance_state(&self, to: WsState) {
        self.inner.state.fetch_max(to as u8, Ordering::AcqRel);
    }

    /// The room registry this connection belongs to.
    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.inner.registry
    }

    /// Names of rooms this connection is currently in.
    pub fn joined_rooms(&self) -> Vec<String> {
        self.inner.rooms.lock().iter().cloned().collect()
    }

    pub(crate) fn rooms_set(&self) -> &Mutex<HashSet<String>> {
        &self.inner.rooms
    }

    /// Attaches a named value to the connection.
    pub fn set_data(&self, key: &str, value: Value) {
        self.inner.data.lock().insert(key.to_owned(), value);
    }

    /// Reads a named value previously attached to the connection.
    pub fn data(&self, key: &str) -> Option<Value> {
        self.inner.data.lock().get(key).cloned()
    }

    /// Joins a room. Returns `false` when the room limit is reached.
    pub async fn join(&self, room: &str) -> bool {
        self.inner.registry.join(self, room)
    }

    /// Leaves a room.
    pub async fn leave(&self, room: &str) {
        self.inner.registry.leave(self, room);
    }

    /// Sends a text message. Returns `false` when the connection is not open
    /// or the message was dropped by the overflow policy.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_message(Message::text(text.into())).await
    }

    /// Sends a binary message.
    pub async fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.send_message(Message::binary(data.into())).await
    }

    /// Sends a structured event frame: `{"event": …, "data": …}`.
    pub async fn emit(&self, event: &str, data: Value) -> bool {
        let frame = serde_json::json!({ "event": event, "data": data });
        self.send_text(frame.to_string()).await
    }

    /// Initiates a close handshake with the given code.
    pub async fn close(&self, code: u16) {
        if self.state() >= WsState::Closing {
            return;
        }
        self.advance_state(WsState::Closing);
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        let _ = self.inner.tx.send(Message::Close(Some(frame))).await;
    }

    pub(crate) async fn send_message(&self, msg: Message) -> bool {
        if self.state() != WsState::Open {
            return false;
        }
        match self.inner.overflow {
            OverflowPolicy::Block => self.inner.tx.send(msg).await.is_ok(),
            OverflowPolicy::Drop => match self.inner.tx.try_send(msg) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(conn = %self.inner.id, "write queue full, message dropped");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
        }
    }
}

/// Computes the `Sec-WebSocket-Accept` value for a client key.
pub(crate) fn accept_key(key: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(WS_GUID);
    STANDARD.encode(sha1.finalize())
}

fn reject(status: StatusCode, message: &'static str) -> Response {
    hyper::Response::builder()
        .status(status)
        .body(RushBody::from(message))
        .unwrap_or_else(|_| hyper::Response::new(RushBody::empty()))
}

/// Upgrade responder: validates the handshake, answers 101, and hands the
/// hijacked connection to the handler.
pub struct WsUpgrade<H, Fut>
where
    H: FnOnce(WsConnection, WsReceiver) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    ctx: Context,
    handler: H,
    registry: Arc<RoomManager>,
    opts: WsRuntimeOptions,
}

impl<H, Fut> WsUpgrade<H, Fut>
where
    H: FnOnce(WsConnection, WsReceiver) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    /// Creates the upgrade responder for this request.
    pub fn new(
        ctx: Context,
        handler: H,
        registry: Arc<RoomManager>,
        opts: WsRuntimeOptions,
    ) -> Self {
        Self {
            ctx,
            handler,
            registry,
            opts,
        }
    }
}

impl<H, Fut> Responder for WsUpgrade<H, Fut>
where
    H: FnOnce(WsConnection, WsReceiver) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn into_response(self) -> Response {
        let Self {
            mut ctx,
            handler,
            registry,
            opts,
        } = self;

        // Origin allow-list check happens before any protocol work.
        if let Some(allowed) = &opts.allowed_origins {
            let origin = ctx.header("origin").unwrap_or("");
            if !allowed.iter().any(|a| a == origin) {
                return reject(StatusCode::FORBIDDEN, "origin not allowed");
            }
        }

        if let Some(version) = ctx.header("sec-websocket-version") {
            if version != "13" {
                return reject(StatusCode::BAD_REQUEST, "unsupported websocket version");
            }
        }

        let key = match ctx.header("sec-websocket-key") {
            Some(k) => k.to_owned(),
            None => return reject(StatusCode::BAD_REQUEST, "missing Sec-WebSocket-Key"),
        };
        let accept = accept_key(key.as_bytes());

        // Subprotocol negotiation: first client-offered protocol we support.
        let protocol = ctx.header("sec-websocket-protocol").and_then(|offered| {
            offered
                .split(',')
                .map(str::trim)
                .find(|p| opts.subprotocols.iter().any(|s| s == p))
                .map(str::to_owned)
        });

        let mut builder = hyper::Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "Upgrade")
            .header("Sec-WebSocket-Accept", accept);
        if let Some(p) = &protocol {
            builder = builder.header("Sec-WebSocket-Protocol", p.clone());
        }
        let response = builder
            .body(RushBody::empty())
            .unwrap_or_else(|_| hyper::Response::new(RushBody::empty()));

        if let Some(on_upgrade) = ctx
            .extensions_mut()
            .remove::<hyper::upgrade::OnUpgrade>()
        {
            tokio::spawn(async move {
                match on_upgrade.await {
                    Ok(upgraded) => {
                        let io = TokioIo::new(upgraded);
                        let config = WebSocketConfig::default()
                            .max_message_size(Some(opts.max_message_size))
                            .max_frame_size(Some(opts.max_message_size));
                        let stream =
                            WebSocketStream::from_raw_socket(io, Role::Server, Some(config))
                                .await;
                        run_connection(stream, handler, registry, opts).await;
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "websocket upgrade failed");
                    }
                }
            });
        }

        response
    }
}

/// Runs one connection: writer task, read loop, and room cleanup.
async fn run_connection<S, H, Fut>(
    stream: WebSocketStream<S>,
    handler: H,
    registry: Arc<RoomManager>,
    opts: WsRuntimeOptions,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    H: FnOnce(WsConnection, WsReceiver) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::channel::<Message>(opts.send_queue.max(1));
    let (msg_tx, msg_rx) = mpsc::channel::<WsMessage>(opts.send_queue.max(1));

    let conn = WsConnection::new(
        uuid::Uuid::new_v4().to_string(),
        tx.clone(),
        registry.clone(),
        opts.overflow,
    );
    conn.advance_state(WsState::Open);
    registry.register(&conn);

    // Writer: drains the bounded queue into the socket.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                break;
            }
            if is_close {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // User handler runs beside the read loop; a panic there must not take
    // down the connection bookkeeping.
    let handler_conn = conn.clone();
    let user = tokio::spawn(async move {
        let _ = std::panic::AssertUnwindSafe(handler(handler_conn, msg_rx))
            .catch_unwind()
            .await;
    });

    loop {
        let frame = match tokio::time::timeout(opts.idle_timeout, source.next()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(_) => {
                // Idle too long: close and stop reading.
                tracing::debug!(conn = %conn.id(), "websocket idle timeout");
                conn.close(1001).await;
                break;
            }
        };

        match frame {
            Ok(Message::Text(text)) => {
                registry.touch_liveness(conn.id());
                if msg_tx
                    .send(WsMessage::Text(text.as_str().to_owned()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(Message::Binary(data)) => {
                registry.touch_liveness(conn.id());
                if msg_tx.send(WsMessage::Binary(data)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = tx.send(Message::Pong(payload)).await;
            }
            Ok(Message::Pong(_)) => {
                registry.touch_liveness(conn.id());
            }
            Ok(Message::Close(frame)) => {
                conn.advance_state(WsState::Closing);
                let _ = tx.send(Message::Close(frame)).await;
                break;
            }
            Ok(Message::Frame(_)) => {}
            Err(tokio_tungstenite::tungstenite::Error::Capacity(_)) => {
                // Message larger than the configured cap.
                let frame = CloseFrame {
                    code: CloseCode::Size,
                    reason: "message too large".into(),
                };
                let _ = tx.send(Message::Close(Some(frame))).await;
                break;
            }
            Err(err) => {
                tracing::debug!(conn = %conn.id(), error = %err, "websocket read error");
                break;
            }
        }
    }

    conn.advance_state(WsState::Closed);
    registry.leave_all(&conn);
    registry.unregister(conn.id());
    user.abort();
    // Every sender must drop before the writer can drain and close the
    // socket: the channel stays open while any connection handle lives.
    drop(msg_tx);
    drop(tx);
    drop(conn);
    let _ = writer.await;
}
