// ============================
// chatterbox-lib/src/config.rs
// ============================
//! Configuration loaded from the process environment.
//!
//! Each field falls back to its default independently, so one unparseable
//! variable does not discard the rest of the environment.

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_PATH: &str = "chatterbox.db";
const DEFAULT_MAX_ROOMS: usize = 100;
const DEFAULT_MAX_HISTORY: usize = 50;

/// Server configuration.
///
/// | env var | default |
/// |---|---|
/// | `PORT` | `8080` |
/// | `DB_PATH` | `chatterbox.db` (`:memory:` accepted) |
/// | `MAX_ROOMS` | `100` |
/// | `MAX_HISTORY` | `50` |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub port: u16,
    pub db_path: String,
    pub max_rooms: usize,
    pub max_history: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: DEFAULT_DB_PATH.to_string(),
            max_rooms: DEFAULT_MAX_ROOMS,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

impl Settings {
    /// Load configuration from environment variables.
    pub fn load() -> Self {
        match Config::builder().add_source(Environment::default()).build() {
            Ok(cfg) => Self::from_config(&cfg),
            Err(_) => Self::default(),
        }
    }

    fn from_config(cfg: &Config) -> Self {
        let defaults = Self::default();
        Self {
            port: cfg.get::<u16>("port").unwrap_or(defaults.port),
            db_path: cfg.get::<String>("db_path").unwrap_or(defaults.db_path),
            max_rooms: cfg.get::<usize>("max_rooms").unwrap_or(defaults.max_rooms),
            max_history: cfg
                .get::<usize>("max_history")
                .unwrap_or(defaults.max_history),
        }
    }
}
