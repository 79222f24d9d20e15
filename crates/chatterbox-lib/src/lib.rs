// ============================
// chatterbox-lib/src/lib.rs
// ============================
//! Core library for the chatterbox multi-room chat server.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod room;
pub mod session;
pub mod store;
pub mod testutil;
pub mod ws_router;

use std::sync::Arc;

use crate::config::Settings;
use crate::hub::Hub;
use crate::store::Store;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Room directory and message router.
    pub hub: Hub,
    /// Message persistence backend.
    pub store: Arc<dyn Store>,
    /// Server configuration.
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(hub: Hub, store: Arc<dyn Store>, settings: Settings) -> Self {
        Self {
            hub,
            store,
            settings: Arc::new(settings),
        }
    }
}
