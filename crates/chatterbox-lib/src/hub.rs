// ============================
// chatterbox-lib/src/hub.rs
// ============================
//! The hub: owns the room directory, serialises room lifecycle, and routes
//! register/unregister/message intents onto rooms.
//!
//! Directory inserts and deletes happen only on the hub's event loop, so
//! capacity checks and the empty-room reap cannot race each other. Snapshots
//! (`list_rooms`, `room_info`) take the read side of the directory lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use metrics::counter;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info, warn};

use crate::domain::{self, Message, RoomInfo, ServerFrame};
use crate::metrics as keys;
use crate::room::{Client, Room};
use crate::store::Store;

/// Buffer size for each of the hub's intent channels.
const HUB_INTENT_BUFFER: usize = 256;

/// Asks the hub to add a client to a room, creating it if needed.
pub struct RegisterRequest {
    pub client: Arc<dyn Client>,
    pub room: String,
}

/// Asks the hub to remove a client from a room.
pub struct UnregisterRequest {
    pub client: Arc<dyn Client>,
    pub room: String,
}

/// Routes a message through the hub to a room.
pub struct MessageRequest {
    pub message: Message,
    pub sender: Arc<dyn Client>,
}

struct Intents {
    register_rx: mpsc::Receiver<RegisterRequest>,
    unregister_rx: mpsc::Receiver<UnregisterRequest>,
    message_rx: mpsc::Receiver<MessageRequest>,
}

/// Cloneable handle on the hub. All clones share one directory and one
/// event loop.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    register_tx: mpsc::Sender<RegisterRequest>,
    unregister_tx: mpsc::Sender<UnregisterRequest>,
    message_tx: mpsc::Sender<MessageRequest>,
    intents: Mutex<Option<Intents>>,
    store: Arc<dyn Store>,
    max_rooms: usize,
    max_history: usize,
    quit: watch::Sender<bool>,
}

impl Hub {
    pub fn new(store: Arc<dyn Store>, max_rooms: usize, max_history: usize) -> Self {
        let (register_tx, register_rx) = mpsc::channel(HUB_INTENT_BUFFER);
        let (unregister_tx, unregister_rx) = mpsc::channel(HUB_INTENT_BUFFER);
        let (message_tx, message_rx) = mpsc::channel(HUB_INTENT_BUFFER);
        let (quit, _) = watch::channel(false);

        Self {
            inner: Arc::new(HubInner {
                rooms: RwLock::new(HashMap::new()),
                register_tx,
                unregister_tx,
                message_tx,
                intents: Mutex::new(Some(Intents {
                    register_rx,
                    unregister_rx,
                    message_rx,
                })),
                store,
                max_rooms,
                max_history,
                quit,
            }),
        }
    }

    /// The hub's event loop. Run as its own task; the only writer to the
    /// room directory. Exits on [`Hub::stop`].
    pub async fn run(&self) {
        let mut intents = match self.inner.intents.lock().await.take() {
            Some(intents) => intents,
            None => {
                warn!("hub event loop already running");
                return;
            }
        };
        let mut quit_rx = self.inner.quit.subscribe();
        if *quit_rx.borrow() {
            return;
        }

        loop {
            tokio::select! {
                maybe = intents.register_rx.recv() => match maybe {
                    Some(req) => self.handle_register(req).await,
                    None => break,
                },
                maybe = intents.unregister_rx.recv() => match maybe {
                    Some(req) => self.handle_unregister(req).await,
                    None => break,
                },
                maybe = intents.message_rx.recv() => match maybe {
                    Some(req) => self.handle_message(req).await,
                    None => break,
                },
                _ = quit_rx.changed() => break,
            }
        }
    }

    /// Signal the event loop to exit and stop every room. Idempotent.
    pub fn stop(&self) {
        let _ = self.inner.quit.send(true);
        let rooms: Vec<Arc<Room>> = {
            let rooms = self.inner.rooms.read().unwrap_or_else(|e| e.into_inner());
            rooms.values().cloned().collect()
        };
        for room in rooms {
            room.stop();
        }
    }

    /// Queue a client registration intent.
    pub async fn register(&self, client: Arc<dyn Client>, room: String) {
        let _ = self
            .inner
            .register_tx
            .send(RegisterRequest { client, room })
            .await;
    }

    /// Queue a client unregistration intent.
    pub async fn unregister(&self, client: Arc<dyn Client>, room: String) {
        let _ = self
            .inner
            .unregister_tx
            .send(UnregisterRequest { client, room })
            .await;
    }

    /// Queue a message for persistence and room broadcast.
    pub async fn route_message(&self, message: Message, sender: Arc<dyn Client>) {
        let _ = self
            .inner
            .message_tx
            .send(MessageRequest { message, sender })
            .await;
    }

    /// Snapshot of all live rooms.
    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        let rooms = self.inner.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms
            .values()
            .map(|r| RoomInfo {
                name: r.name().to_string(),
                user_count: r.client_count(),
            })
            .collect()
    }

    /// Snapshot of one room, or `None` if the name is unknown.
    pub fn room_info(&self, name: &str) -> Option<RoomInfo> {
        let rooms = self.inner.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms.get(name).map(|r| RoomInfo {
            name: r.name().to_string(),
            user_count: r.client_count(),
        })
    }

    async fn handle_register(&self, req: RegisterRequest) {
        let room = {
            let mut rooms = self.inner.rooms.write().unwrap_or_else(|e| e.into_inner());
            match rooms.get(&req.room) {
                Some(room) => Some(room.clone()),
                None if rooms.len() >= self.inner.max_rooms => None,
                None => {
                    let room = Arc::new(Room::new(
                        &req.room,
                        self.inner.store.clone(),
                        self.inner.max_history,
                    ));
                    rooms.insert(req.room.clone(), room.clone());
                    let runner = room.clone();
                    tokio::spawn(async move { runner.run().await });
                    info!(room = %req.room, "room created");
                    counter!(keys::ROOMS_CREATED).increment(1);
                    Some(room)
                }
            }
        };

        match room {
            Some(room) => room.join(req.client).await,
            None => {
                warn!(room = %req.room, "registration rejected: max rooms reached");
                counter!(keys::ROOMS_REJECTED).increment(1);
                send_error(&req.client, "max rooms reached");
            }
        }
    }

    async fn handle_unregister(&self, req: UnregisterRequest) {
        let room = {
            let rooms = self.inner.rooms.read().unwrap_or_else(|e| e.into_inner());
            rooms.get(&req.room).cloned()
        };
        let Some(room) = room else { return };

        room.leave(req.client).await;

        // Auto-reap empty rooms. Re-check under the write lock so a
        // concurrent register for the same name cannot lose its room.
        if room.client_count() == 0 {
            let mut rooms = self.inner.rooms.write().unwrap_or_else(|e| e.into_inner());
            if room.client_count() == 0 {
                room.stop();
                rooms.remove(&req.room);
                info!(room = %req.room, "room deleted");
                counter!(keys::ROOMS_DELETED).increment(1);
            }
        }
    }

    async fn handle_message(&self, req: MessageRequest) {
        let room = {
            let rooms = self.inner.rooms.read().unwrap_or_else(|e| e.into_inner());
            rooms.get(&req.message.room).cloned()
        };
        let Some(room) = room else {
            send_error(&req.sender, "room not found");
            return;
        };

        if let Err(e) = self.inner.store.save(&req.message).await {
            error!(room = %req.message.room, error = %e, "store save error");
            counter!(keys::STORE_ERRORS).increment(1);
        }

        match domain::encode(&req.message) {
            Ok(frame) => {
                counter!(keys::CHAT_ROUTED).increment(1);
                room.broadcast(frame).await;
            }
            Err(e) => error!(room = %req.message.room, error = %e, "encode message failed"),
        }
    }
}

/// Deliver an `error` frame to a single client.
fn send_error(client: &Arc<dyn Client>, message: &str) {
    match domain::encode(&ServerFrame::error(message)) {
        Ok(frame) => client.send(frame),
        Err(e) => error!(error = %e, "encode error frame failed"),
    }
}
