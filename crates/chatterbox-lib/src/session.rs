// ============================
// chatterbox-lib/src/session.rs
// ============================
//! One connected client: a pair of cooperating I/O loops over a single
//! WebSocket.
//!
//! The read loop decodes inbound frames, validates them, and enqueues
//! intents on the hub. The write loop is the sole consumer of the bounded
//! outbound queue and owns keepalive pings. Either loop ending tears the
//! session down exactly once: further `send` calls become no-ops, every
//! joined room receives an unregister, and the peer loop is signalled to
//! exit, so no background work outlives the connection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{self, MessageType, ServerFrame};
use crate::hub::Hub;
use crate::metrics as keys;
use crate::room::Client;

/// Time allowed to write one frame to the peer.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed to read the next pong from the peer. If no pong arrives
/// within this window, the connection is considered dead.
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping cadence. Must be less than `PONG_WAIT` so a missed pong is
/// detected before the next ping is due.
const PING_PERIOD: Duration = Duration::from_secs(54);

/// Maximum inbound frame size in bytes, enforced at the upgrade.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Outbound queue capacity per session.
const SEND_BUFFER_SIZE: usize = 256;

/// Per-connection state: identity, room membership, and the outbound queue.
pub struct Session {
    id: Uuid,
    username: String,
    hub: Hub,
    outbound_tx: mpsc::Sender<String>,
    rooms: Mutex<HashSet<String>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Session {
    /// Create a session and hand back the receiving end of its outbound
    /// queue for the write loop.
    pub fn new(hub: Hub, username: String) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_BUFFER_SIZE);
        let (shutdown, _) = watch::channel(false);
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            username,
            hub,
            outbound_tx,
            rooms: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
            shutdown,
        });
        (session, outbound_rx)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Queue a frame for the write loop. Never blocks: a full queue drops
    /// the frame (the slow reader is sacrificed, not the room), and a
    /// disconnected session swallows it silently.
    pub fn send(&self, frame: String) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match self.outbound_tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(user = %self.username, "send buffer full, dropping frame");
                counter!(keys::FRAMES_DROPPED).increment(1);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Read inbound frames until error, close, timeout, or teardown.
    ///
    /// The read deadline is rolled forward only on each pong. Other
    /// traffic does not extend it, so a peer that stops answering pings
    /// surfaces as a timeout here even if it keeps sending data.
    pub async fn read_loop(self: Arc<Self>, mut stream: SplitStream<WebSocket>) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut deadline = Instant::now() + PONG_WAIT;
        loop {
            let received = tokio::select! {
                _ = shutdown_rx.changed() => break,
                received = timeout_at(deadline, stream.next()) => received,
            };
            let frame = match received {
                Err(_) => {
                    debug!(user = %self.username, "read deadline expired");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    debug!(user = %self.username, error = %e, "read error");
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                WsMessage::Text(text) => self.clone().handle_frame(text.as_bytes()).await,
                WsMessage::Binary(data) => self.clone().handle_frame(&data).await,
                WsMessage::Pong(_) => deadline = Instant::now() + PONG_WAIT,
                WsMessage::Ping(_) => {}
                WsMessage::Close(_) => break,
            }
        }
        self.teardown().await;
    }

    /// Drain the outbound queue onto the wire and keep the connection
    /// alive with periodic pings.
    pub async fn write_loop(
        self: Arc<Self>,
        mut sink: SplitSink<WebSocket, WsMessage>,
        mut outbound_rx: mpsc::Receiver<String>,
    ) {
        let mut ping = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                maybe = outbound_rx.recv() => match maybe {
                    Some(frame) => {
                        match timeout(WRITE_WAIT, sink.send(WsMessage::Text(frame.into()))).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                debug!(user = %self.username, error = %e, "write error");
                                break;
                            }
                            Err(_) => {
                                debug!(user = %self.username, "write deadline expired");
                                break;
                            }
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    let ping_result =
                        timeout(WRITE_WAIT, sink.send(WsMessage::Ping(Bytes::new()))).await;
                    if !matches!(ping_result, Ok(Ok(()))) {
                        debug!(user = %self.username, "ping failed");
                        break;
                    }
                }
                _ = shutdown_rx.changed() => {
                    let _ = timeout(WRITE_WAIT, sink.send(WsMessage::Close(None))).await;
                    break;
                }
            }
        }
        self.teardown().await;
    }

    /// Run the teardown sequence at most once: mark disconnected, leave
    /// every room, then signal the peer loop to exit.
    pub async fn teardown(self: Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(user = %self.username, "session closed");

        let rooms: Vec<String> = {
            let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
            rooms.drain().collect()
        };
        for room in rooms {
            self.hub.unregister(self.clone(), room).await;
        }

        let _ = self.shutdown.send(true);
    }

    async fn handle_frame(self: Arc<Self>, data: &[u8]) {
        let mut msg = match domain::decode_message(data) {
            Ok(msg) => msg,
            Err(_) => {
                self.send_error("invalid JSON");
                return;
            }
        };

        match msg.kind {
            MessageType::Join => {
                if msg.room.is_empty() {
                    self.send_error("room name required");
                    return;
                }
                {
                    let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
                    if !rooms.insert(msg.room.clone()) {
                        // Already a member; joining twice is a silent no-op.
                        return;
                    }
                }
                self.hub.register(self.clone(), msg.room).await;
            }
            MessageType::Leave => {
                if msg.room.is_empty() {
                    self.send_error("room name required");
                    return;
                }
                {
                    let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
                    rooms.remove(&msg.room);
                }
                self.hub.unregister(self.clone(), msg.room).await;
            }
            MessageType::Chat => {
                if msg.room.is_empty() || msg.text.is_empty() {
                    self.send_error("room and text required");
                    return;
                }
                let in_room = {
                    let rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
                    rooms.contains(&msg.room)
                };
                if !in_room {
                    self.send_error("not in room");
                    return;
                }
                msg.user = self.username.clone();
                msg.timestamp = Some(Utc::now());
                self.hub.route_message(msg, self.clone()).await;
            }
            kind => self.send_error(&format!("unknown message type: {kind}")),
        }
    }

    fn send_error(&self, message: &str) {
        match domain::encode(&ServerFrame::error(message)) {
            Ok(frame) => self.send(frame),
            Err(e) => debug!(user = %self.username, error = %e, "encode error frame failed"),
        }
    }
}

impl Client for Session {
    fn id(&self) -> Uuid {
        self.id
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn send(&self, frame: String) {
        Session::send(self, frame);
    }
}
