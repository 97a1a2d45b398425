//! Connection sessions.
//!
//! A session drives one participant's connection through
//! `Connecting -> Active -> Closed`. It registers the participant, replays
//! history, announces the join, then reads messages until the connection
//! fails, the hub closes it after a failed delivery, or a shutdown signal
//! fires. Leaving `Active` always unregisters the
//! participant and closes its sink, whichever way the session ends.

use crate::hub::{Hub, HubError};
use crate::message::{InboundMessage, SYSTEM_NICKNAME};
use crate::registry::Registry;
use crate::store::StorageError;
use kidder_protocol::ClientMessage;
use kidder_transport::{ConnectionId, MessageSink, MessageSource, TransportError};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registering and replaying history.
    Connecting,
    /// Reading and relaying messages.
    Active,
    /// Torn down.
    Closed,
}

/// Errors that abort a session before it becomes active.
#[derive(Debug, Error)]
pub enum SessionError {
    /// History could not be loaded.
    #[error("Failed to load history: {0}")]
    History(#[from] StorageError),

    /// History could not be written to the participant.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Unregisters the participant and closes its sink exactly once.
struct Registration {
    registry: Arc<Registry>,
    id: ConnectionId,
    nickname: String,
    sink: Arc<dyn MessageSink>,
    released: bool,
}

impl Registration {
    async fn release(mut self) {
        self.registry.unregister(&self.id);
        self.released = true;
        self.sink.close().await;
        info!(connection = %self.id, nickname = %self.nickname, "Participant disconnected");
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        self.registry.unregister(&self.id);
        warn!(connection = %self.id, nickname = %self.nickname, "Session dropped while active");

        let sink = Arc::clone(&self.sink);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { sink.close().await });
        }
    }
}

/// One participant's connection lifecycle.
pub struct Session {
    hub: Arc<Hub>,
    id: ConnectionId,
    sink: Arc<dyn MessageSink>,
    requested_name: Option<String>,
    state: watch::Sender<SessionState>,
}

impl Session {
    /// Create a session for an established connection.
    #[must_use]
    pub fn new(hub: Arc<Hub>, id: ConnectionId, sink: Arc<dyn MessageSink>) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            hub,
            id,
            sink,
            requested_name: None,
            state,
        }
    }

    /// Ask for a display name.
    #[must_use]
    pub fn with_requested_name(mut self, name: Option<String>) -> Self {
        self.requested_name = name;
        self
    }

    /// Connection handle of this session.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Follow the lifecycle state while the session runs.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn transition(&self, to: SessionState) {
        let from = self.state.send_replace(to);
        debug!(connection = %self.id, from = ?from, to = ?to, "Session state change");
    }

    /// Run until the connection ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the session could not become active.
    pub async fn run<S: MessageSource>(self, source: S) -> Result<(), SessionError> {
        self.run_until(source, std::future::pending::<()>()).await
    }

    /// Run until the connection ends or `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the session could not become active.
    pub async fn run_until<S, F>(self, mut source: S, shutdown: F) -> Result<(), SessionError>
    where
        S: MessageSource,
        F: Future<Output = ()> + Send,
    {
        let nickname = self.hub.allocate_name(self.requested_name.as_deref());
        // Registered before the replay, so live broadcasts can arrive ahead of
        // or between history frames, and a message may show up in both.
        self.hub
            .registry()
            .register(self.id.clone(), nickname.clone(), Arc::clone(&self.sink));
        let registration = Registration {
            registry: Arc::clone(self.hub.registry()),
            id: self.id.clone(),
            nickname: nickname.clone(),
            sink: Arc::clone(&self.sink),
            released: false,
        };
        info!(connection = %self.id, nickname = %nickname, "Participant connected");

        if let Err(e) = self.replay_history().await {
            error!(connection = %self.id, error = %e, "Aborting session");
            self.transition(SessionState::Closed);
            registration.release().await;
            return Err(e);
        }
        self.announce_join(&nickname).await;
        self.transition(SessionState::Active);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    debug!(connection = %self.id, "Shutdown requested");
                    break;
                }
                () = self.sink.closed() => {
                    debug!(connection = %self.id, "Connection closed by the hub");
                    break;
                }
                result = source.recv() => match result {
                    Ok(Some(message)) => self.relay(&nickname, message).await,
                    Ok(None) => {
                        debug!(connection = %self.id, "Connection closed by peer");
                        break;
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(connection = %self.id, error = %e, "Discarding malformed message");
                    }
                    Err(e) => {
                        debug!(connection = %self.id, error = %e, "Read failed");
                        break;
                    }
                }
            }
        }

        self.transition(SessionState::Closed);
        registration.release().await;
        Ok(())
    }

    async fn replay_history(&self) -> Result<(), SessionError> {
        let history = self.hub.history().await?;
        for message in &history {
            self.sink.send(&message.to_wire()).await?;
        }
        debug!(connection = %self.id, count = history.len(), "Replayed history");
        Ok(())
    }

    async fn announce_join(&self, nickname: &str) {
        let notice = InboundMessage::text(format!("{nickname} joined the chat"));
        if let Err(e) = self.hub.accept(SYSTEM_NICKNAME, notice).await {
            warn!(connection = %self.id, error = %e, "Failed to announce join");
        }
    }

    async fn relay(&self, nickname: &str, message: ClientMessage) {
        let inbound = match InboundMessage::try_from(message) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(connection = %self.id, error = %e, "Discarding invalid message");
                return;
            }
        };

        match self.hub.accept(nickname, inbound).await {
            Ok(stored) => {
                trace!(connection = %self.id, kind = %stored.kind, "Message accepted");
            }
            Err(HubError::Storage(e)) => {
                warn!(connection = %self.id, error = %e, "Failed to persist message, dropping it");
            }
            Err(e) => {
                error!(connection = %self.id, error = %e, "Failed to queue message");
            }
        }
    }
}
