//! Message types for the Kidder wire protocol.
//!
//! Clients send [`ClientMessage`] objects and the hub answers with
//! [`ServerMessage`] objects. Both are plain JSON text frames.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text message.
    #[default]
    Text,
    /// Message carrying an uploaded image reference.
    Image,
}

impl MessageKind {
    /// Wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// A message sent by a participant to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Message body.
    #[serde(default)]
    pub text: String,
    /// Reference to an uploaded image.
    #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Declared message kind.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
}

impl ClientMessage {
    /// Create a text message.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image_url: None,
            kind: Some(MessageKind::Text),
        }
    }

    /// Create an image message with an optional caption.
    #[must_use]
    pub fn image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image_url: Some(image_url.into()),
            kind: Some(MessageKind::Image),
        }
    }
}

/// A message delivered by the hub to participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Display name of the author.
    pub nickname: String,
    /// Message body.
    pub text: String,
    /// RFC 3339 UTC timestamp.
    pub time: String,
    /// Reference to an uploaded image.
    #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
}
