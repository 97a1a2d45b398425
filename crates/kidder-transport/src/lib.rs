//! # kidder-transport
//!
//! Transport abstraction layer for the Kidder chat hub.
//!
//! Connections are split into a write half ([`MessageSink`]) shared with the
//! broadcast fan-out and a read half ([`MessageSource`]) owned by the session:
//!
//! ```rust,ignore
//! use kidder_transport::{websocket, MessageSource};
//!
//! async fn handle(socket: axum::extract::ws::WebSocket) {
//!     let (sink, mut source) = websocket::split(socket);
//!     while let Ok(Some(message)) = source.recv().await {
//!         // Process message
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{ConnectionId, MessageSink, MessageSource, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketSink, WebSocketSource};
