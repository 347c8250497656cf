//! Error types for the replybot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; callers wrap them in their
//! own (see `AgentError`).

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Prompt cache not found: {0}")]
    CacheNotFound(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    /// Another writer committed between our read and our write.
    #[error("History conflict on {key}: stored revision changed")]
    Conflict { key: String },

    #[error("History store unavailable: {0}")]
    Unavailable(String),

    /// The stored blob exists but cannot be decoded.
    #[error("History for {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("History operation timed out: {0}")]
    Timeout(String),
}

impl HistoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Failures of a tool's side-effecting operation.
///
/// `Display` carries the full detail for operators. What the model gets to
/// see is [`ToolError::model_message`].
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Upstream service {service} failed for {tool_name}: {detail}")]
    Upstream {
        tool_name: String,
        service: String,
        detail: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Reply already sent for this message")]
    ReplyAlreadySent,
}

impl ToolError {
    /// The sanitized text reported back to the model.
    pub fn model_message(&self) -> String {
        match self {
            Self::Upstream {
                tool_name, service, ..
            } => format!("{tool_name} failed: {service} is unavailable"),
            Self::NotFound(what) => format!("not found: {what}"),
            Self::InvalidArguments(reason) => format!("invalid arguments: {reason}"),
            Self::ReplyAlreadySent => "a reply was already sent for this message".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Duplicate tool name: {0}")]
    DuplicateName(String),

    #[error("Invalid {which} schema for tool {tool_name}: {reason}")]
    InvalidSchema {
        tool_name: String,
        which: &'static str,
        reason: String,
    },
}

/// Fatal dispatch failures. Everything recoverable becomes a tool result instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Tool {tool_name} returned a result violating its response schema: {violations}")]
    ResponseSchemaViolation {
        tool_name: String,
        violations: String,
    },

    #[error("Tool {tool_name} produced an unserializable result: {reason}")]
    UnserializableResult { tool_name: String, reason: String },
}
