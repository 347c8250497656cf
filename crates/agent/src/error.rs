//! Failures of one agent invocation.

use replybot_core::error::{DispatchError, HistoryError, ProviderError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Provider call failed: {0}")]
    Provider(#[from] ProviderError),

    /// The model kept calling tools without any of them finishing the turn.
    #[error("Tool-call budget exhausted after {rounds} rounds")]
    BudgetExhausted { rounds: u32 },

    #[error("Invocation deadline of {}s exceeded", after.as_secs())]
    Timeout { after: Duration },

    #[error("History store failed: {0}")]
    History(#[from] HistoryError),

    #[error("History append kept conflicting; gave up after {attempts} attempts")]
    ConflictRetriesExhausted { attempts: u32 },

    /// A tool broke its own contract (e.g. its response schema).
    #[error("Tool contract violation: {0}")]
    ToolContract(#[from] DispatchError),
}

impl AgentError {
    /// Stable classification for logs and callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider",
            Self::BudgetExhausted { .. } => "tool-call budget exhausted",
            Self::Timeout { .. } => "timeout",
            Self::History(_) => "history",
            Self::ConflictRetriesExhausted { .. } => "history conflict retries exhausted",
            Self::ToolContract(_) => "tool contract violation",
        }
    }
}
