//! The replybot agent loop.
//!
//! One invocation per inbound message:
//!
//! 1. **Load** the conversation's history (or continue without it, if allowed)
//! 2. **Call** the model with the history window plus the new user turn
//! 3. **Dispatch** any tool calls, in order, and feed the results back
//! 4. **Stop** on a plain-text answer or once a final tool succeeds
//! 5. **Append** the new turns, retrying from a fresh read on conflict
//!
//! The whole invocation is bounded by a round budget and a wall-clock
//! deadline.

pub mod error;
pub mod loop_runner;
pub mod prompt_cache;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::AgentError;
pub use loop_runner::{Agent, AgentConfig, Outcome, Persistence};
pub use prompt_cache::PromptCache;
