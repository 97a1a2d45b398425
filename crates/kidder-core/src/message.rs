//! Chat message types.
//!
//! [`InboundMessage`] is what a session accepts from a participant after
//! validation; [`StoredMessage`] is what the store hands back once the
//! message has been persisted and timestamped.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use kidder_protocol::{ClientMessage, MessageKind, ServerMessage};
use thiserror::Error;

/// Display name used for notices generated by the hub itself.
pub const SYSTEM_NICKNAME: &str = "System";

/// Reasons an inbound message is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Blank text and no attachment.
    #[error("Message has neither text nor an image")]
    Empty,
}

/// A validated message from a participant, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Message body.
    pub text: String,
    /// Reference to an uploaded image.
    pub attachment: Option<String>,
    /// Message kind.
    pub kind: MessageKind,
}

impl InboundMessage {
    /// Create a text message.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
            kind: MessageKind::Text,
        }
    }

    /// Create an image message with a caption.
    #[must_use]
    pub fn image(text: impl Into<String>, attachment: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: Some(attachment.into()),
            kind: MessageKind::Image,
        }
    }
}

impl TryFrom<ClientMessage> for InboundMessage {
    type Error = ValidationError;

    /// A message only counts as an image when it says so and carries a
    /// non-empty reference; anything else is plain text.
    fn try_from(message: ClientMessage) -> Result<Self, Self::Error> {
        let attachment = message
            .image_url
            .filter(|url| !url.trim().is_empty())
            .filter(|_| message.kind == Some(MessageKind::Image));

        let inbound = match attachment {
            Some(url) => Self::image(message.text, url),
            None => Self::text(message.text),
        };

        if inbound.text.trim().is_empty() && inbound.attachment.is_none() {
            return Err(ValidationError::Empty);
        }
        Ok(inbound)
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Display name of the author.
    pub nickname: String,
    /// Message body.
    pub text: String,
    /// Reference to an uploaded image.
    pub attachment: Option<String>,
    /// Message kind.
    pub kind: MessageKind,
    /// When the message was persisted, truncated to milliseconds.
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    /// Build a stored message from an inbound one.
    #[must_use]
    pub fn new(author: impl Into<String>, message: &InboundMessage, timestamp: DateTime<Utc>) -> Self {
        Self {
            nickname: author.into(),
            text: message.text.clone(),
            attachment: message.attachment.clone(),
            kind: message.kind,
            timestamp: timestamp.trunc_subsecs(3),
        }
    }

    /// Build a stored message stamped with the current time.
    #[must_use]
    pub fn now(author: impl Into<String>, message: &InboundMessage) -> Self {
        Self::new(author, message, Utc::now())
    }

    /// Convert to the outbound wire representation.
    #[must_use]
    pub fn to_wire(&self) -> ServerMessage {
        ServerMessage {
            nickname: self.nickname.clone(),
            text: self.text.clone(),
            time: self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            image_url: self.attachment.clone(),
            kind: self.kind,
        }
    }
}
