//! Messaging trait: the abstraction over the chat platform.
//!
//! The platform collaborator turns webhook deliveries into
//! [`InboundMessage`]s and delivers replies through a [`Messenger`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::message::ConversationKey;

/// One inbound text message, already stripped of platform framing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// User, group, or room the message belongs to
    pub conversation_key: ConversationKey,

    /// Platform user ID of the sender
    pub sender_id: String,

    /// The text content
    pub text: String,

    /// Single-use token for answering on the same channel
    pub reply_token: String,
}

/// A message to deliver to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Text { text: String },
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
        }
    }
}

/// The core Messenger trait.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Human-readable platform name (e.g., "line", "console").
    fn name(&self) -> &str;

    /// Answer a message using its reply token.
    async fn reply(
        &self,
        reply_token: &str,
        messages: &[OutboundMessage],
    ) -> std::result::Result<(), ChannelError>;
}
