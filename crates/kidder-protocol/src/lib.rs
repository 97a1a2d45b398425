//! # kidder-protocol
//!
//! Wire protocol definitions for the Kidder chat hub.
//!
//! Participants and the hub exchange JSON objects over WebSocket text frames:
//!
//! - [`ClientMessage`] - `{text, imageUrl?, type?}` sent by a participant
//! - [`ServerMessage`] - `{nickname, text, time, imageUrl?, type}` fanned out by the hub
//!
//! ## Example
//!
//! ```rust
//! use kidder_protocol::{codec, ClientMessage};
//!
//! let msg = codec::decode(r#"{"text":"hi","type":"text"}"#).unwrap();
//! assert_eq!(msg, ClientMessage::text("hi"));
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{ClientMessage, MessageKind, ServerMessage};
