// ============================
// chatterbox-lib/src/domain.rs
// ============================
//! Wire schema for the chat protocol.
//!
//! Every frame on the socket is one JSON object. Simple notifications
//! (`chat`, `join`, `leave`, `system`) share the flat [`Message`] shape;
//! the composite server-originated frames (`history`, `presence`, `error`)
//! are modelled by [`ServerFrame`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant carried in the `type` field of every frame.
///
/// An unrecognised tag deserialises into `Other` rather than failing the
/// decode; the session layer reports it back to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Chat,
    Join,
    Leave,
    System,
    History,
    Presence,
    Error,
    #[serde(untagged)]
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Chat => "chat",
            MessageType::Join => "join",
            MessageType::Leave => "leave",
            MessageType::System => "system",
            MessageType::History => "history",
            MessageType::Presence => "presence",
            MessageType::Error => "error",
            MessageType::Other(s) => s,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        match s {
            "chat" => MessageType::Chat,
            "join" => MessageType::Join,
            "leave" => MessageType::Leave,
            "system" => MessageType::System,
            "history" => MessageType::History,
            "presence" => MessageType::Presence,
            "error" => MessageType::Error,
            other => MessageType::Other(other.to_string()),
        }
    }
}

/// A chat protocol message. Empty fields are omitted on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub room: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// A `join` notification broadcast to a room.
    pub fn join(room: &str, user: &str) -> Self {
        Self {
            kind: MessageType::Join,
            room: room.to_string(),
            user: user.to_string(),
            text: String::new(),
            timestamp: None,
        }
    }

    /// A `leave` notification broadcast to a room.
    pub fn leave(room: &str, user: &str) -> Self {
        Self {
            kind: MessageType::Leave,
            room: room.to_string(),
            user: user.to_string(),
            text: String::new(),
            timestamp: None,
        }
    }

    /// A `system` notice delivered directly to one session.
    pub fn system(text: &str) -> Self {
        Self {
            kind: MessageType::System,
            room: String::new(),
            user: String::new(),
            text: text.to_string(),
            timestamp: None,
        }
    }
}

/// Composite frames the server sends to a single client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    History {
        room: String,
        messages: Vec<Message>,
    },
    Presence {
        room: String,
        users: Vec<String>,
    },
    Error {
        message: String,
    },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}

/// Room summary exposed by the admin read API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub name: String,
    pub user_count: usize,
}

/// Serialise a frame to its JSON text representation.
pub fn encode<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

/// Parse an inbound frame into a [`Message`].
pub fn decode_message(data: &[u8]) -> Result<Message, serde_json::Error> {
    serde_json::from_slice(data)
}
