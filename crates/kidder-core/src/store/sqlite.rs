//! SQLite-backed message store.

use super::{MessageStore, StorageError};
use crate::message::{InboundMessage, StoredMessage};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use kidder_protocol::MessageKind;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    nickname TEXT NOT NULL,
    text TEXT NOT NULL,
    image_url TEXT,
    message_type TEXT NOT NULL DEFAULT 'text',
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages (timestamp);
"#;

#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    nickname: String,
    text: String,
    image_url: Option<String>,
    message_type: String,
    timestamp: String,
}

impl MessageRow {
    fn into_message(self) -> Result<StoredMessage, String> {
        let kind = MessageKind::from_str(&self.message_type)?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| format!("bad timestamp {:?}: {e}", self.timestamp))?
            .with_timezone(&Utc);

        Ok(StoredMessage {
            nickname: self.nickname,
            text: self.text,
            attachment: self.image_url,
            kind,
            timestamp,
        })
    }
}

/// Timestamps are stored fixed-width so that text order is time order.
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Message store backed by a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created.
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Unavailable(format!(
                    "creating database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "Opened message database");
        Self::from_pool(pool).await
    }

    /// Create an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // Every connection to :memory: is its own database, so pin exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(
        &self,
        message: &InboundMessage,
        author: &str,
    ) -> Result<StoredMessage, StorageError> {
        let stored = StoredMessage::now(author, message);

        sqlx::query(
            r#"
            INSERT INTO messages (nickname, text, image_url, message_type, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&stored.nickname)
        .bind(&stored.text)
        .bind(&stored.attachment)
        .bind(stored.kind.as_str())
        .bind(format_timestamp(&stored.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn recent_history(&self, limit: usize) -> Result<Vec<StoredMessage>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, nickname, text, image_url, message_type, timestamp
            FROM messages
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<StoredMessage> = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                match row.into_message() {
                    Ok(message) => Some(message),
                    Err(e) => {
                        warn!(id, error = %e, "Skipping unreadable message row");
                        None
                    }
                }
            })
            .collect();

        messages.reverse();
        debug!(count = messages.len(), "Loaded message history");
        Ok(messages)
    }
}
