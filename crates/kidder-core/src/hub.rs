//! Broadcast hub.
//!
//! Accepted messages go into one unbounded queue. A single [`FanOut`] task
//! drains it and writes each message to every registered participant, so all
//! participants observe messages in enqueue order. Participants whose write
//! fails are closed and pruned from the registry.

use crate::message::{InboundMessage, StoredMessage};
use crate::names::{NameAllocator, DEFAULT_PREFIX};
use crate::registry::{Registry, Visit};
use crate::store::{MessageStore, StorageError};
use kidder_protocol::codec;
use kidder_transport::ConnectionId;
use metrics::{counter, histogram};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Metric names recorded by the hub.
pub mod metric_names {
    pub const MESSAGES_ACCEPTED: &str = "kidder_messages_accepted_total";
    pub const STORAGE_ERRORS: &str = "kidder_storage_errors_total";
    pub const DELIVERY_FAILURES: &str = "kidder_delivery_failures_total";
    pub const FANOUT_SECONDS: &str = "kidder_fanout_seconds";
}

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The message could not be persisted.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The fan-out task is gone.
    #[error("Broadcast queue closed")]
    QueueClosed,
}

/// Producer side of the broadcast queue.
pub trait Publisher: Send + Sync {
    /// Enqueue a message for fan-out. Never waits for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer has stopped.
    fn publish(&self, message: StoredMessage) -> Result<(), HubError>;
}

/// Unbounded queue feeding a [`FanOut`].
#[derive(Debug, Clone)]
pub struct BroadcastQueue {
    sender: mpsc::UnboundedSender<StoredMessage>,
}

impl Publisher for BroadcastQueue {
    fn publish(&self, message: StoredMessage) -> Result<(), HubError> {
        self.sender
            .send(message)
            .map_err(|_| HubError::QueueClosed)
    }
}

/// Create a queue and its consumer.
#[must_use]
pub fn queue(registry: Arc<Registry>) -> (BroadcastQueue, FanOut) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        BroadcastQueue { sender },
        FanOut {
            receiver,
            registry,
            write_timeout: None,
        },
    )
}

/// Outcome of delivering one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Participants that received the message.
    pub delivered: usize,
    /// Participants removed because their write failed.
    pub pruned: usize,
}

/// The single consumer of the broadcast queue.
pub struct FanOut {
    receiver: mpsc::UnboundedReceiver<StoredMessage>,
    registry: Arc<Registry>,
    write_timeout: Option<Duration>,
}

impl FanOut {
    /// Treat writes slower than `timeout` as failed.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Drain the queue until every producer is dropped.
    pub async fn run(mut self) {
        info!("Fan-out started");
        while let Some(message) = self.receiver.recv().await {
            self.deliver(&message).await;
        }
        info!("Broadcast queue closed, fan-out stopped");
    }

    /// Write one message to every current participant and prune the ones
    /// that failed.
    pub async fn deliver(&self, message: &StoredMessage) -> DeliveryReport {
        let start = Instant::now();
        let text = match codec::encode(&message.to_wire()) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode broadcast message");
                return DeliveryReport::default();
            }
        };

        let mut delivered = 0;
        let mut failed: HashSet<ConnectionId> = HashSet::new();

        for participant in self.registry.snapshot() {
            let result = match self.write_timeout {
                Some(timeout) => tokio::time::timeout(timeout, participant.sink.send_text(&text))
                    .await
                    .unwrap_or_else(|_| {
                        Err(kidder_transport::TransportError::SendFailed(
                            "write timed out".into(),
                        ))
                    }),
                None => participant.sink.send_text(&text).await,
            };

            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        connection = %participant.id,
                        nickname = %participant.nickname,
                        error = %e,
                        "Delivery failed, dropping participant"
                    );
                    // close() can stall on a peer that stopped reading
                    let sink = Arc::clone(&participant.sink);
                    tokio::spawn(async move { sink.close().await });
                    failed.insert(participant.id);
                }
            }
        }

        let pruned = if failed.is_empty() {
            0
        } else {
            counter!(metric_names::DELIVERY_FAILURES).increment(failed.len() as u64);
            self.registry.for_each(|p| {
                if failed.contains(&p.id) {
                    Visit::Remove
                } else {
                    Visit::Keep
                }
            })
        };

        histogram!(metric_names::FANOUT_SECONDS).record(start.elapsed().as_secs_f64());
        trace!(delivered, pruned, "Broadcast delivered");

        DeliveryReport { delivered, pruned }
    }
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Messages replayed to a joining participant.
    pub history_limit: usize,
    /// Prefix for synthesized display names.
    pub name_prefix: String,
    /// Per-participant write timeout during fan-out.
    pub write_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            name_prefix: DEFAULT_PREFIX.to_string(),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// The chat hub: registry, broadcast queue, store and name allocation.
pub struct Hub {
    registry: Arc<Registry>,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn MessageStore>,
    names: NameAllocator,
    config: HubConfig,
}

impl Hub {
    /// Create a hub and the fan-out task that must be run for it.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, config: HubConfig) -> (Self, FanOut) {
        let registry = Arc::new(Registry::new());
        let (queue, fanout) = queue(Arc::clone(&registry));
        let fanout = fanout.with_write_timeout(config.write_timeout);
        let hub = Self::with_parts(store, Arc::new(queue), registry, config);
        (hub, fanout)
    }

    /// Create a hub and spawn its fan-out on the current runtime.
    #[must_use]
    pub fn spawn(store: Arc<dyn MessageStore>, config: HubConfig) -> Arc<Self> {
        let (hub, fanout) = Self::new(store, config);
        tokio::spawn(fanout.run());
        Arc::new(hub)
    }

    /// Assemble a hub from explicit parts.
    #[must_use]
    pub fn with_parts(
        store: Arc<dyn MessageStore>,
        publisher: Arc<dyn Publisher>,
        registry: Arc<Registry>,
        config: HubConfig,
    ) -> Self {
        debug!(?config, "Creating hub");
        Self {
            registry,
            publisher,
            store,
            names: NameAllocator::new(config.name_prefix.clone()),
            config,
        }
    }

    /// The participant registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Pick a display name for a new session.
    #[must_use]
    pub fn allocate_name(&self, requested: Option<&str>) -> String {
        self.names.allocate(requested, &self.registry)
    }

    /// The history replayed to joining participants, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn history(&self) -> Result<Vec<StoredMessage>, StorageError> {
        self.store.recent_history(self.config.history_limit).await
    }

    /// Persist a message and queue it for fan-out.
    ///
    /// A message that fails to persist is not broadcast.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting or enqueueing fails.
    pub async fn accept(
        &self,
        author: &str,
        message: InboundMessage,
    ) -> Result<StoredMessage, HubError> {
        let stored = match self.store.append(&message, author).await {
            Ok(stored) => stored,
            Err(e) => {
                counter!(metric_names::STORAGE_ERRORS).increment(1);
                return Err(e.into());
            }
        };

        self.publisher.publish(stored.clone())?;
        counter!(metric_names::MESSAGES_ACCEPTED).increment(1);
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{wait_for, FlakyStore, RecordingPublisher, RecordingSink, StuckSink};

    fn stored(text: &str) -> StoredMessage {
        StoredMessage::now("Alice", &InboundMessage::text(text))
    }

    #[tokio::test]
    async fn test_deliver_to_all() {
        let registry = Arc::new(Registry::new());
        let (_queue, fanout) = queue(Arc::clone(&registry));

        let a = RecordingSink::new();
        let b = RecordingSink::new();
        registry.register(ConnectionId::new("a"), "A", a.clone());
        registry.register(ConnectionId::new("b"), "B", b.clone());

        let report = fanout.deliver(&stored("hello")).await;
        assert_eq!(report, DeliveryReport { delivered: 2, pruned: 0 });
        assert_eq!(a.texts(), vec!["hello"]);
        assert_eq!(b.texts(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_dead_connection_pruned() {
        let registry = Arc::new(Registry::new());
        let (_queue, fanout) = queue(Arc::clone(&registry));

        let alive = RecordingSink::new();
        let dead = RecordingSink::failing();
        registry.register(ConnectionId::new("alive"), "Alive", alive.clone());
        registry.register(ConnectionId::new("dead"), "Dead", dead.clone());

        let report = fanout.deliver(&stored("first")).await;
        assert_eq!(report, DeliveryReport { delivered: 1, pruned: 1 });
        assert_eq!(registry.len(), 1);
        wait_for(|| dead.is_closed()).await;

        // The pruned participant is not tried again
        let attempts = dead.attempts();
        fanout.deliver(&stored("second")).await;
        assert_eq!(dead.attempts(), attempts);
        assert_eq!(alive.texts(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_stalled_participant_times_out_and_is_pruned() {
        let registry = Arc::new(Registry::new());
        let (_queue, fanout) = queue(Arc::clone(&registry));
        let fanout = fanout.with_write_timeout(Duration::from_millis(50));

        let alive = RecordingSink::new();
        let stuck = StuckSink::new();
        registry.register(ConnectionId::new("alive"), "Alive", alive.clone());
        registry.register(ConnectionId::new("stuck"), "Stuck", stuck.clone());

        let report = tokio::time::timeout(Duration::from_secs(2), fanout.deliver(&stored("first")))
            .await
            .expect("delivery stalled on a participant that stopped reading");
        assert_eq!(report, DeliveryReport { delivered: 1, pruned: 1 });
        assert_eq!(registry.names(), vec!["Alive".to_string()]);
        assert_eq!(stuck.attempts(), 1);

        let report = tokio::time::timeout(Duration::from_secs(2), fanout.deliver(&stored("second")))
            .await
            .unwrap();
        assert_eq!(report, DeliveryReport { delivered: 1, pruned: 0 });
        assert_eq!(alive.texts(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let registry = Arc::new(Registry::new());
        let (queue, fanout) = queue(Arc::clone(&registry));
        let task = tokio::spawn(fanout.run());

        let sinks: Vec<_> = (0..3)
            .map(|i| {
                let sink = RecordingSink::new();
                registry.register(ConnectionId::new(format!("c{i}")), format!("P{i}"), sink.clone());
                sink
            })
            .collect();

        let expected: Vec<String> = (0..100).map(|i| format!("m{i}")).collect();
        for text in &expected {
            queue.publish(stored(text)).unwrap();
        }

        for sink in &sinks {
            wait_for(|| sink.texts().len() == expected.len()).await;
            assert_eq!(sink.texts(), expected);
        }

        drop(queue);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_after_consumer_gone() {
        let registry = Arc::new(Registry::new());
        let (queue, fanout) = queue(registry);
        drop(fanout);
        assert!(matches!(
            queue.publish(stored("late")),
            Err(HubError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_accept_persists_then_publishes() {
        let store = Arc::new(MemoryStore::new());
        let publisher = RecordingPublisher::new();
        let hub = Hub::with_parts(
            store.clone(),
            publisher.clone(),
            Arc::new(Registry::new()),
            HubConfig::default(),
        );

        let accepted = hub.accept("Alice", InboundMessage::text("hi")).await.unwrap();

        assert_eq!(store.recent_history(10).await.unwrap(), vec![accepted.clone()]);
        assert_eq!(publisher.published(), vec![accepted]);
    }

    #[tokio::test]
    async fn test_storage_failure_not_published() {
        let store = FlakyStore::new();
        store.reject("lost");
        let publisher = RecordingPublisher::new();
        let hub = Hub::with_parts(
            store.clone(),
            publisher.clone(),
            Arc::new(Registry::new()),
            HubConfig::default(),
        );

        let result = hub.accept("Alice", InboundMessage::text("lost")).await;
        assert!(matches!(result, Err(HubError::Storage(_))));
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_history_respects_limit() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..10 {
            store
                .append(&InboundMessage::text(format!("m{i}")), "Alice")
                .await
                .unwrap();
        }
        let config = HubConfig {
            history_limit: 4,
            ..HubConfig::default()
        };
        let (hub, _fanout) = Hub::new(store, config);

        let texts: Vec<_> = hub.history().await.unwrap().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, ["m6", "m7", "m8", "m9"]);
    }
}
