// ============================
// chatterbox-lib/src/testutil.rs
// ============================
//! In-memory doubles for the [`Client`] and [`Store`] seams, shared by unit
//! and integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::domain::{Message, MessageType};
use crate::error::AppError;
use crate::room::Client;
use crate::store::Store;
use async_trait::async_trait;
use chrono::Utc;

/// Records every frame sent to it.
pub struct MockClient {
    id: Uuid,
    name: String,
    frames: Mutex<Vec<String>>,
}

impl MockClient {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            frames: Mutex::new(Vec::new()),
        })
    }

    /// Raw frames received so far.
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Frames received so far, parsed as JSON.
    pub fn decoded_frames(&self) -> Vec<serde_json::Value> {
        self.frames()
            .iter()
            .filter_map(|f| serde_json::from_str(f).ok())
            .collect()
    }
}

impl Client for MockClient {
    fn id(&self) -> Uuid {
        self.id
    }

    fn username(&self) -> &str {
        &self.name
    }

    fn send(&self, frame: String) {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(frame);
    }
}

/// In-memory [`Store`] keeping messages per room in insertion order.
pub struct MockStore {
    messages: Mutex<HashMap<String, Vec<Message>>>,
    fail: bool,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(HashMap::new()),
            fail: false,
        })
    }

    /// A store whose every operation fails, for error-path tests.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(HashMap::new()),
            fail: true,
        })
    }

    /// Pre-seed a persisted chat message.
    pub fn seed_chat(&self, room: &str, user: &str, text: &str) {
        let msg = Message {
            kind: MessageType::Chat,
            room: room.to_string(),
            user: user.to_string(),
            text: text.to_string(),
            timestamp: Some(Utc::now()),
        };
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(room.to_string())
            .or_default()
            .push(msg);
    }

    /// Messages saved for a room, in insertion order.
    pub fn saved(&self, room: &str) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(room)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MockStore {
    async fn save(&self, msg: &Message) -> Result<(), AppError> {
        if self.fail {
            return Err(AppError::Internal("mock store failure".to_string()));
        }
        let mut stamped = msg.clone();
        if stamped.timestamp.is_none() {
            stamped.timestamp = Some(Utc::now());
        }
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(msg.room.clone())
            .or_default()
            .push(stamped);
        Ok(())
    }

    async fn history(&self, room: &str, limit: usize) -> Result<Vec<Message>, AppError> {
        if self.fail {
            return Err(AppError::Internal("mock store failure".to_string()));
        }
        let messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let msgs = messages.get(room).cloned().unwrap_or_default();
        let start = msgs.len().saturating_sub(limit);
        Ok(msgs[start..].to_vec())
    }

    async fn close(&self) -> Result<(), AppError> {
        Ok(())
    }
}
