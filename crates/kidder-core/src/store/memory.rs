//! In-process message store.

use super::{MessageStore, StorageError};
use crate::message::{InboundMessage, StoredMessage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Default number of messages kept in memory.
const DEFAULT_RETAINED: usize = 10_000;

/// A bounded in-memory log. The oldest messages are dropped once
/// `retained` is exceeded.
#[derive(Debug)]
pub struct MemoryStore {
    messages: Mutex<VecDeque<StoredMessage>>,
    retained: usize,
}

impl MemoryStore {
    /// Create a store with the default retention.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETAINED)
    }

    /// Create a store keeping at most `retained` messages.
    #[must_use]
    pub fn with_retention(retained: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            retained: retained.max(1),
        }
    }

    /// Number of messages currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(
        &self,
        message: &InboundMessage,
        author: &str,
    ) -> Result<StoredMessage, StorageError> {
        let stored = StoredMessage::now(author, message);
        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        messages.push_back(stored.clone());
        while messages.len() > self.retained {
            messages.pop_front();
        }
        Ok(stored)
    }

    async fn recent_history(&self, limit: usize) -> Result<Vec<StoredMessage>, StorageError> {
        let messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.iter().skip(skip).cloned().collect())
    }
}
