// ==============
// chatterbox-lib/src/metrics.rs

//! Central place for metric key names.
pub const SESSIONS_CONNECTED: &str = "session.connected";
pub const SESSIONS_ACTIVE: &str = "session.active";
pub const ROOMS_CREATED: &str = "room.created";
pub const ROOMS_DELETED: &str = "room.deleted";
pub const ROOMS_REJECTED: &str = "room.rejected";
pub const CHAT_ROUTED: &str = "chat.routed";
pub const FRAMES_DROPPED: &str = "frame.dropped";
pub const STORE_ERRORS: &str = "store.errors";
