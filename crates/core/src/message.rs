//! Conversation domain types.
//!
//! These are the value objects that flow through the whole system:
//! inbound message → Agent builds turns → Provider reads them → History persists them.

use serde::{Deserialize, Serialize};

/// Stable identifier partitioning history: one user, group, or room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey(pub String);

impl ConversationKey {
    pub fn user(id: &str) -> Self {
        Self(format!("user:{id}"))
    }

    pub fn group(id: &str) -> Self {
        Self(format!("group:{id}"))
    }

    pub fn room(id: &str) -> Self {
        Self(format!("room:{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a turn's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human on the chat platform
    User,
    /// The hosted model
    Model,
    /// Results of tool calls the model asked for
    Tool,
}

/// One model-issued invocation of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlates the call with its result in the next prompt turn
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments exactly as the model produced them
    pub arguments: serde_json::Value,
}

/// The outcome of one tool call.
///
/// Failures travel on their own variant; a success payload never carries
/// its own error flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The schema-validated result payload
    Success(serde_json::Value),
    /// A model-visible error description
    Error(String),
}

/// The result of a tool call, correlated by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,

    /// Name of the tool the call addressed (some providers need it on the way back)
    pub tool_name: String,

    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, payload: serde_json::Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Success(payload),
        }
    }

    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Error(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error(_))
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            ToolOutcome::Error(message) => Some(message),
            ToolOutcome::Success(_) => None,
        }
    }
}

/// One logical, immutable step of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    /// Text received from the chat platform
    User {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<String>,
    },
    /// A plain-text answer from the model
    ModelText { text: String },
    /// The model asked for one or more tool calls
    ModelToolCalls { calls: Vec<ToolCall> },
    /// Results for every call of the preceding model turn
    ToolResults { results: Vec<ToolResult> },
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            text: text.into(),
            sender_id: None,
        }
    }

    pub fn user_from(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::User {
            text: text.into(),
            sender_id: Some(sender_id.into()),
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self::ModelText { text: text.into() }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::User { .. } => Role::User,
            Self::ModelText { .. } | Self::ModelToolCalls { .. } => Role::Model,
            Self::ToolResults { .. } => Role::Tool,
        }
    }
}

/// An ordered, append-only sequence of turns for one conversation key.
///
/// Only whole-sequence reads and tail appends are offered; there is no way
/// to reorder or edit a turn once it is in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a batch at the tail.
    pub fn extend(&mut self, batch: impl IntoIterator<Item = Turn>) {
        self.turns.extend(batch);
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    /// The last `max` turns, moved forward so the window never opens on a
    /// tool-results turn whose calls were cut off.
    pub fn window(&self, max: usize) -> &[Turn] {
        let mut start = self.turns.len().saturating_sub(max);
        while start < self.turns.len()
            && matches!(self.turns[start], Turn::ToolResults { .. })
        {
            start += 1;
        }
        &self.turns[start..]
    }
}
