//! Codec for encoding and decoding Kidder messages.
//!
//! Every WebSocket text frame carries exactly one JSON object.

use thiserror::Error;

use crate::frames::{ClientMessage, ServerMessage};

/// Maximum accepted inbound frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum of 65536 bytes")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frames are not part of the protocol.
    #[error("Unexpected binary frame ({0} bytes)")]
    UnexpectedBinary(usize),
}

/// Encode an outbound message to JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(message: &ServerMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode an inbound message from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large or is not a valid client message.
pub fn decode(text: &str) -> Result<ClientMessage, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Decode an outbound message, as a client would.
///
/// # Errors
///
/// Returns an error if the text is not a valid server message.
pub fn decode_server(text: &str) -> Result<ServerMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
