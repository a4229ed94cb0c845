//! Inbound event model.
//!
//! The transport converts whatever the chat service delivers into a
//! [`MessageEvent`]. Only text messages reach the dispatcher; everything
//! else is the transport's business.

use serde::{Deserialize, Serialize};

/// A text message received from the chat stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Chat (conversation) the message was posted in.
    pub chat_id: i64,
    /// Author of the message.
    pub sender_id: i64,
    /// Identifier of the message inside its chat.
    pub message_id: i64,
    /// Raw message text, possibly empty for media-only messages.
    pub text: String,
    /// `true` when the message was authored by the controlling identity
    /// (the account the router runs as).
    pub outgoing: bool,
    /// Message this one replies to, if any.
    #[serde(default)]
    pub reply_to: Option<i64>,
}

impl MessageEvent {
    /// Creates an event with no reply reference.
    pub fn new(
        chat_id: i64,
        sender_id: i64,
        message_id: i64,
        text: impl Into<String>,
        outgoing: bool,
    ) -> Self {
        Self {
            chat_id,
            sender_id,
            message_id,
            text: text.into(),
            outgoing,
            reply_to: None,
        }
    }

    /// Sets the message this event replies to.
    pub fn replying_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    /// Returns the message text.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Identifies a message produced by a transport send/edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SentMessage {
    /// Chat the message lives in.
    pub chat_id: i64,
    /// Identifier of the message inside its chat.
    pub message_id: i64,
}
