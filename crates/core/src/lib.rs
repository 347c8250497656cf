//! # replybot core
//!
//! Domain types, traits, and error definitions for the replybot agent.
//! This crate has **no framework dependencies**: it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator (model provider, history store, messaging platform,
//! tool) is a trait here. Implementations live in their own crates, which
//! keeps them swappable via configuration and easy to stub in tests.

pub mod channel;
pub mod context;
pub mod error;
pub mod history;
pub mod message;
pub mod provider;
pub mod schema;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use channel::{InboundMessage, Messenger, OutboundMessage};
pub use context::{ReplyHandle, RequestContext};
pub use history::{HistoryStore, StoredRevision};
pub use message::{
    ConversationHistory, ConversationKey, Role, ToolCall, ToolOutcome, ToolResult, Turn,
};
pub use provider::{CacheRef, ModelOutput, Provider, ToolDefinition};
pub use tool::{DispatchOutcome, Tool, ToolRegistry};
