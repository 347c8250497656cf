//! Provider trait: the abstraction over the hosted model.
//!
//! A Provider takes a system prompt (inline or pre-uploaded as a cache),
//! the conversation so far and the tool definitions, and answers with
//! either final text or a set of tool calls.
//!
//! Implementations: Gemini (native cached content), OpenAI-compatible endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderError;
use crate::message::{ToolCall, Turn};

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Handle to a system prompt uploaded ahead of time.
///
/// Whoever called `create_cache` owns it and must `delete_cache` it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheRef(pub String);

impl std::fmt::Display for CacheRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What one model call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// A final answer with no tool calls
    Text(String),
    /// A non-empty list of tool calls
    ToolCalls(Vec<ToolCall>),
}

impl ModelOutput {
    /// Build from a raw response carrying both parts.
    ///
    /// Tool calls take precedence; text that accompanies them is dropped.
    pub fn from_parts(text: String, tool_calls: Vec<ToolCall>) -> Self {
        if tool_calls.is_empty() {
            Self::Text(text)
        } else {
            if !text.trim().is_empty() {
                debug!(
                    text_len = text.len(),
                    calls = tool_calls.len(),
                    "Discarding text that accompanied tool calls"
                );
            }
            Self::ToolCalls(tool_calls)
        }
    }
}

/// The core Provider trait.
///
/// Safe for concurrent use: one instance is shared by every in-flight
/// invocation.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "gemini").
    fn name(&self) -> &str;

    /// Generate with an inline system prompt.
    async fn generate_text(
        &self,
        system_prompt: &str,
        conversation: &[Turn],
        tools: &[ToolDefinition],
    ) -> std::result::Result<ModelOutput, ProviderError>;

    /// Generate with a system prompt previously uploaded via [`Provider::create_cache`].
    ///
    /// Providers that bake tool definitions into the cache ignore `tools`.
    async fn generate_text_cached(
        &self,
        cache: &CacheRef,
        conversation: &[Turn],
        tools: &[ToolDefinition],
    ) -> std::result::Result<ModelOutput, ProviderError>;

    /// Upload a system prompt (and the tools it is used with) and return a
    /// handle to it.
    async fn create_cache(
        &self,
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> std::result::Result<CacheRef, ProviderError>;

    /// Release a cached system prompt.
    async fn delete_cache(&self, cache: &CacheRef) -> std::result::Result<(), ProviderError>;

    /// Release provider-held resources.
    async fn close(&self) -> std::result::Result<(), ProviderError> {
        Ok(())
    }
}
