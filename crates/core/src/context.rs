//! Request-scoped values passed explicitly through the Agent and every tool.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::message::ConversationKey;

/// An opaque, single-use token for answering on the originating channel.
///
/// Clones share the "used" flag, so whichever clone takes the token first
/// wins and every later `take` returns `None`.
#[derive(Debug, Clone)]
pub struct ReplyHandle {
    token: Arc<str>,
    used: Arc<AtomicBool>,
}

impl ReplyHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::from(token.into()),
            used: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim the token. Returns `None` once it has been claimed.
    pub fn take(&self) -> Option<&str> {
        if self.used.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(&*self.token)
        }
    }

    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }
}

/// Immutable per-invocation context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub conversation_key: ConversationKey,
    pub sender_id: String,
    pub reply_handle: ReplyHandle,
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(
        conversation_key: ConversationKey,
        sender_id: impl Into<String>,
        reply_handle: ReplyHandle,
    ) -> Self {
        Self {
            conversation_key,
            sender_id: sender_id.into(),
            reply_handle,
            received_at: Utc::now(),
        }
    }
}
