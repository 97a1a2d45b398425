//! Registry of connected participants.
//!
//! Every read and write goes through a single mutex, so a pass over the
//! registry always sees one consistent point in time. The lock is never held
//! across an `.await`.

use kidder_transport::{ConnectionId, MessageSink};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// A connected participant.
#[derive(Clone)]
pub struct Participant {
    /// Connection handle.
    pub id: ConnectionId,
    /// Display name.
    pub nickname: String,
    /// Write half of the participant's connection.
    pub sink: Arc<dyn MessageSink>,
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id)
            .field("nickname", &self.nickname)
            .field("open", &self.sink.is_open())
            .finish()
    }
}

/// What [`Registry::for_each`] should do with the visited entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Leave the entry in place.
    Keep,
    /// Remove the entry.
    Remove,
}

/// The live set of connected participants.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<ConnectionId, Participant>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Participant>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a participant.
    ///
    /// Returns `false` if the handle was already registered, in which case
    /// the old entry is replaced.
    pub fn register(
        &self,
        id: ConnectionId,
        nickname: impl Into<String>,
        sink: Arc<dyn MessageSink>,
    ) -> bool {
        let nickname = nickname.into();
        let mut entries = self.lock();
        let participant = Participant {
            id: id.clone(),
            nickname: nickname.clone(),
            sink,
        };
        let is_new = entries.insert(id.clone(), participant).is_none();
        let count = entries.len();
        drop(entries);

        if is_new {
            debug!(connection = %id, nickname = %nickname, participants = count, "Registered");
        } else {
            warn!(connection = %id, nickname = %nickname, "Connection registered twice, replaced entry");
        }
        is_new
    }

    /// Remove a participant. Removing an absent handle is a no-op.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Participant> {
        let mut entries = self.lock();
        let removed = entries.remove(id);
        let count = entries.len();
        drop(entries);

        if let Some(participant) = &removed {
            debug!(connection = %id, nickname = %participant.nickname, participants = count, "Unregistered");
        }
        removed
    }

    /// Visit every entry under the lock, removing those for which `f`
    /// returns [`Visit::Remove`].
    ///
    /// Returns the number of removed entries.
    pub fn for_each<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&Participant) -> Visit,
    {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, participant| f(participant) == Visit::Keep);
        before - entries.len()
    }

    /// Copy out all entries.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Participant> {
        self.lock().values().cloned().collect()
    }

    /// Check if any participant currently uses `nickname`.
    #[must_use]
    pub fn contains_name(&self, nickname: &str) -> bool {
        self.lock().values().any(|p| p.nickname == nickname)
    }

    /// Check if a handle is registered.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.lock().contains_key(id)
    }

    /// Display names of all participants.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.lock().values().map(|p| p.nickname.clone()).collect()
    }

    /// Number of participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("participants", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    #[test]
    fn test_register_unregister() {
        let registry = Registry::new();
        let id = ConnectionId::new("conn-1");

        assert!(registry.register(id.clone(), "Alice", RecordingSink::new()));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&id));
        assert!(registry.contains_name("Alice"));

        assert!(registry.unregister(&id).is_some());
        assert!(registry.is_empty());

        // Unregistering again is a no-op
        assert!(registry.unregister(&id).is_none());
    }

    #[test]
    fn test_no_duplicate_handles() {
        let registry = Registry::new();
        let id = ConnectionId::new("conn-1");

        assert!(registry.register(id.clone(), "Alice", RecordingSink::new()));
        assert!(!registry.register(id.clone(), "Alicia", RecordingSink::new()));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["Alicia".to_string()]);
    }

    #[test]
    fn test_for_each_removes_marked() {
        let registry = Registry::new();
        for (id, name) in [("c1", "Alice"), ("c2", "Bob"), ("c3", "Carol")] {
            registry.register(ConnectionId::new(id), name, RecordingSink::new());
        }

        let mut visited = 0;
        let removed = registry.for_each(|p| {
            visited += 1;
            if p.nickname == "Bob" {
                Visit::Remove
            } else {
                Visit::Keep
            }
        });

        assert_eq!(visited, 3);
        assert_eq!(removed, 1);
        assert_eq!(registry.len(), 2);
        assert!(!registry.contains_name("Bob"));
    }

    #[test]
    fn test_duplicate_names_allowed() {
        let registry = Registry::new();
        registry.register(ConnectionId::new("c1"), "Alice", RecordingSink::new());
        registry.register(ConnectionId::new("c2"), "Alice", RecordingSink::new());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_register_unregister() {
        let registry = Arc::new(Registry::new());

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let id = ConnectionId::new(format!("conn-{i}"));
                    registry.register(id.clone(), format!("user{i}"), RecordingSink::new());
                    tokio::task::yield_now().await;
                    if i % 2 == 0 {
                        registry.unregister(&id);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len(), 16);
    }
}
