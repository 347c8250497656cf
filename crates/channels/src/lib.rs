//! Messaging-platform adapters for replybot.
//!
//! - **line**: webhook payload types and the reply API client
//! - **signature**: webhook signature verification
//! - **console**: prints replies to stdout, for `replybot chat`

pub mod console;
pub mod line;
pub mod signature;

pub use console::ConsoleMessenger;
pub use line::{LineMessenger, WebhookBatch, WebhookEvent};
pub use signature::verify_signature;
