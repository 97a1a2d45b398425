//! Fakes shared by the unit tests.

use crate::hub::{HubError, Publisher};
use crate::message::{InboundMessage, StoredMessage};
use crate::store::{MemoryStore, MessageStore, StorageError};
use async_trait::async_trait;
use kidder_protocol::{codec, ClientMessage, ServerMessage};
use kidder_transport::{MessageSink, MessageSource, TransportError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Sink that records everything written to it and can be told to fail.
pub struct RecordingSink {
    sent: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    fail: AtomicBool,
    closed: watch::Sender<bool>,
}

impl RecordingSink {
    fn build(fail: bool) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail: AtomicBool::new(fail),
            closed,
        })
    }

    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    pub fn failing() -> Arc<Self> {
        Self::build(true)
    }

    /// Fail every write from now on, without closing.
    pub fn break_pipe(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<ServerMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| codec::decode_server(text).unwrap())
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.text).collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) || self.is_closed() {
            return Err(TransportError::SendFailed("broken pipe".into()));
        }
        self.sent.lock().unwrap().push(text.to_owned());
        Ok(())
    }

    async fn close(&self) {
        self.closed.send_replace(true);
    }

    async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    fn is_open(&self) -> bool {
        !self.is_closed()
    }
}

/// Sink whose writes and close never complete, like a peer that stopped
/// reading with a full socket buffer.
#[derive(Default)]
pub struct StuckSink {
    attempts: AtomicUsize,
}

impl StuckSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSink for StuckSink {
    async fn send_text(&self, _text: &str) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn close(&self) {
        std::future::pending::<()>().await;
    }

    async fn closed(&self) {
        std::future::pending::<()>().await;
    }

    fn is_open(&self) -> bool {
        true
    }
}

/// One scripted read result.
pub enum Step {
    Message(ClientMessage),
    Malformed,
    Fail,
}

/// Source fed by the test through a channel. Dropping the sender is a clean
/// disconnect.
pub struct ScriptedSource {
    steps: mpsc::UnboundedReceiver<Step>,
}

impl ScriptedSource {
    pub fn new() -> (mpsc::UnboundedSender<Step>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { steps: rx })
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn recv(&mut self) -> Result<Option<ClientMessage>, TransportError> {
        match self.steps.recv().await {
            Some(Step::Message(message)) => Ok(Some(message)),
            Some(Step::Malformed) => Err(codec::decode("{oops").unwrap_err().into()),
            Some(Step::Fail) => Err(TransportError::ReceiveFailed("connection reset".into())),
            None => Ok(None),
        }
    }
}

/// Store that records appends and fails on demand.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    appends: Mutex<Vec<(String, String)>>,
    reject_text: Mutex<Option<String>>,
    fail_history: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every append whose text equals `text`.
    pub fn reject(&self, text: &str) {
        *self.reject_text.lock().unwrap() = Some(text.to_string());
    }

    pub fn fail_history(&self) {
        self.fail_history.store(true, Ordering::SeqCst);
    }

    /// `(author, text)` of every attempted append.
    pub fn appends(&self) -> Vec<(String, String)> {
        self.appends.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn append(
        &self,
        message: &InboundMessage,
        author: &str,
    ) -> Result<StoredMessage, StorageError> {
        self.appends
            .lock()
            .unwrap()
            .push((author.to_string(), message.text.clone()));
        let rejected = self.reject_text.lock().unwrap().as_deref() == Some(message.text.as_str());
        if rejected {
            return Err(StorageError::Unavailable("disk full".into()));
        }
        self.inner.append(message, author).await
    }

    async fn recent_history(&self, limit: usize) -> Result<Vec<StoredMessage>, StorageError> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("database is down".into()));
        }
        self.inner.recent_history(limit).await
    }
}

/// Publisher that only records what it was given.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<StoredMessage>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published(&self) -> Vec<StoredMessage> {
        self.published.lock().unwrap().clone()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, message: StoredMessage) -> Result<(), HubError> {
        self.published.lock().unwrap().push(message);
        Ok(())
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_for<F: FnMut() -> bool>(mut condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
