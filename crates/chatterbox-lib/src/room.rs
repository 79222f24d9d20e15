// ============================
// chatterbox-lib/src/room.rs
// ============================
//! A room: membership set, serialised broadcast queue, history on join.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, warn};
use uuid::Uuid;

use crate::domain::{self, Message, ServerFrame};
use crate::store::Store;

/// Buffer size for a room's broadcast queue.
const ROOM_BROADCAST_BUFFER: usize = 256;

/// The capability a room holds on a connected client: an identity and a
/// non-blocking frame sink. Never an owning back-reference to the session.
pub trait Client: Send + Sync {
    fn id(&self) -> Uuid;
    fn username(&self) -> &str;
    /// Queue a frame for delivery. Must not block; a slow or disconnected
    /// client drops the frame rather than stalling the caller.
    fn send(&self, frame: String);
}

/// A chat room. Owns its member set and broadcast queue; created and
/// destroyed only by the hub.
pub struct Room {
    name: String,
    members: RwLock<HashMap<Uuid, Arc<dyn Client>>>,
    broadcast_tx: mpsc::Sender<String>,
    broadcast_rx: Mutex<Option<mpsc::Receiver<String>>>,
    store: Arc<dyn Store>,
    history_limit: usize,
    quit: watch::Sender<bool>,
}

impl Room {
    pub fn new(name: &str, store: Arc<dyn Store>, history_limit: usize) -> Self {
        let (broadcast_tx, broadcast_rx) = mpsc::channel(ROOM_BROADCAST_BUFFER);
        let (quit, _) = watch::channel(false);
        Self {
            name: name.to_string(),
            members: RwLock::new(HashMap::new()),
            broadcast_tx,
            broadcast_rx: Mutex::new(Some(broadcast_rx)),
            store,
            history_limit,
            quit,
        }
    }

    /// The room's fan-out loop. Run as its own task; exits on [`Room::stop`].
    pub async fn run(&self) {
        let mut rx = match self.broadcast_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!(room = %self.name, "fan-out loop already running");
                return;
            }
        };
        let mut quit_rx = self.quit.subscribe();
        if *quit_rx.borrow() {
            return;
        }

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(frame) => self.fan_out(frame),
                    None => break,
                },
                _ = quit_rx.changed() => break,
            }
        }
    }

    /// Signal the fan-out loop to exit. Safe to call repeatedly.
    pub fn stop(&self) {
        let _ = self.quit.send(true);
    }

    /// Deliver one frame to every current member. The member list is
    /// snapshotted first so no lock is held across calls into a client.
    fn fan_out(&self, frame: String) {
        let members: Vec<Arc<dyn Client>> = {
            let members = self.members.read().unwrap_or_else(|e| e.into_inner());
            members.values().cloned().collect()
        };

        let result = catch_unwind(AssertUnwindSafe(|| {
            for member in &members {
                member.send(frame.clone());
            }
        }));
        if let Err(panic) = result {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(room = %self.name, panic = %reason, "recovered from panic during fan-out");
        }
    }

    /// Add a client to the room, then deliver history directly to the
    /// joiner, broadcast the join notification, and deliver a presence
    /// snapshot directly to the joiner.
    pub async fn join(&self, client: Arc<dyn Client>) {
        {
            let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
            members.insert(client.id(), client.clone());
        }

        match self.store.history(&self.name, self.history_limit).await {
            Err(e) => warn!(room = %self.name, error = %e, "history fetch failed"),
            Ok(messages) if !messages.is_empty() => {
                let frame = ServerFrame::History {
                    room: self.name.clone(),
                    messages,
                };
                match domain::encode(&frame) {
                    Ok(data) => client.send(data),
                    Err(e) => error!(room = %self.name, error = %e, "encode history failed"),
                }
            }
            Ok(_) => {}
        }

        let join_msg = Message::join(&self.name, client.username());
        match domain::encode(&join_msg) {
            Ok(data) => {
                let _ = self.broadcast_tx.send(data).await;
            }
            Err(e) => error!(room = %self.name, error = %e, "encode join failed"),
        }

        self.send_presence(&client);
    }

    /// Remove a client and broadcast a leave notification. Removing a
    /// non-member is a no-op without broadcast.
    pub async fn leave(&self, client: Arc<dyn Client>) {
        let removed = {
            let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
            members.remove(&client.id())
        };
        if removed.is_none() {
            return;
        }

        let leave_msg = Message::leave(&self.name, client.username());
        match domain::encode(&leave_msg) {
            Ok(data) => {
                let _ = self.broadcast_tx.send(data).await;
            }
            Err(e) => error!(room = %self.name, error = %e, "encode leave failed"),
        }
    }

    /// Queue an already-encoded frame for delivery to every member.
    pub async fn broadcast(&self, frame: String) {
        let _ = self.broadcast_tx.send(frame).await;
    }

    pub fn client_count(&self) -> usize {
        self.members.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Usernames of current members, in no particular order.
    pub fn users(&self) -> Vec<String> {
        let members = self.members.read().unwrap_or_else(|e| e.into_inner());
        members.values().map(|c| c.username().to_string()).collect()
    }

    fn send_presence(&self, client: &Arc<dyn Client>) {
        let frame = ServerFrame::Presence {
            room: self.name.clone(),
            users: self.users(),
        };
        match domain::encode(&frame) {
            Ok(data) => client.send(data),
            Err(e) => error!(room = %self.name, error = %e, "encode presence failed"),
        }
    }
}
