//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] into a [`MessageSink`] /
//! [`MessageSource`] pair.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use kidder_protocol::{codec, ClientMessage, ProtocolError};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace, warn};

use crate::traits::{MessageSink, MessageSource, TransportError};

/// How long `close` waits for the close frame to flush.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Split an upgraded socket into its write and read halves.
#[must_use]
pub fn split(socket: WebSocket) -> (WebSocketSink, WebSocketSource) {
    let (sink, stream) = socket.split();
    let (closed, _) = watch::channel(false);
    (
        WebSocketSink {
            sink: Mutex::new(sink),
            closed,
        },
        WebSocketSource { stream },
    )
}

/// Write half of a WebSocket connection.
pub struct WebSocketSink {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl MessageSink for WebSocketSink {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Text(text.to_owned())).await {
            self.closed.send_replace(true);
            return Err(TransportError::SendFailed(e.to_string()));
        }
        Ok(())
    }

    async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        // A peer that stopped reading never drains the close frame
        let flush = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, flush).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Error while closing WebSocket"),
            Err(_) => debug!("Timed out flushing WebSocket close frame"),
        }
    }

    async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }
}

/// Read half of a WebSocket connection.
pub struct WebSocketSource {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl MessageSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<ClientMessage>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    trace!(bytes = text.len(), "Received text frame");
                    return codec::decode(&text).map(Some).map_err(TransportError::from);
                }
                Some(Ok(Message::Binary(data))) => {
                    return Err(ProtocolError::UnexpectedBinary(data.len()).into());
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pongs are answered by the WebSocket layer itself
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}
