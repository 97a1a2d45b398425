//! Message persistence.
//!
//! The hub only needs two things from storage: append a message and read
//! back the most recent ones. [`MessageStore`] is that seam.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::message::{InboundMessage, StoredMessage};
use async_trait::async_trait;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not complete the operation.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::Unavailable(e.to_string())
    }
}

/// Durable append-only message log.
///
/// Implementations do not retry; failures go straight back to the caller.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and assign its timestamp.
    async fn append(
        &self,
        message: &InboundMessage,
        author: &str,
    ) -> Result<StoredMessage, StorageError>;

    /// The most recent `limit` messages, oldest first.
    async fn recent_history(&self, limit: usize) -> Result<Vec<StoredMessage>, StorageError>;
}
