// ============================
// chatterbox-lib/src/store.rs
// ============================
//! Message persistence: the [`Store`] trait and its SQLite implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::domain::{Message, MessageType};
use crate::error::AppError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    room TEXT NOT NULL,
    user TEXT NOT NULL,
    text TEXT NOT NULL,
    type TEXT NOT NULL,
    created_at DATETIME NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_room_created ON messages(room, created_at);
";

/// Message persistence interface consumed by the hub and rooms.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a message. A missing timestamp is stamped with `now` (UTC).
    async fn save(&self, msg: &Message) -> Result<(), AppError>;

    /// The last `limit` messages for a room, oldest first.
    async fn history(&self, room: &str, limit: usize) -> Result<Vec<Message>, AppError>;

    /// Release any resources held by the store. Called once at shutdown.
    async fn close(&self) -> Result<(), AppError>;
}

/// SQLite-backed [`Store`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    /// `":memory:"` is accepted for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, AppError> {
        let in_memory = path == ":memory:";
        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };

        // An in-memory database exists per connection; a single long-lived
        // connection keeps every handle on the same database.
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn save(&self, msg: &Message) -> Result<(), AppError> {
        let created_at = msg.timestamp.unwrap_or_else(Utc::now);
        sqlx::query(
            "INSERT INTO messages (room, user, text, type, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&msg.room)
        .bind(&msg.user)
        .bind(&msg.text)
        .bind(msg.kind.as_str())
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history(&self, room: &str, limit: usize) -> Result<Vec<Message>, AppError> {
        let rows: Vec<(String, String, String, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT room, user, text, type, created_at FROM messages \
             WHERE room = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(room)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<Message> = rows
            .into_iter()
            .map(|(room, user, text, kind, created_at)| Message {
                kind: MessageType::from(kind.as_str()),
                room,
                user,
                text,
                timestamp: Some(created_at),
            })
            .collect();

        // Query returns newest-first; callers expect oldest-first.
        messages.reverse();
        Ok(messages)
    }

    async fn close(&self) -> Result<(), AppError> {
        self.pool.close().await;
        Ok(())
    }
}
