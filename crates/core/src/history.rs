//! History store trait: per-conversation, append-only turn log.
//!
//! Writes use optimistic concurrency: `get` hands out the revision it read,
//! and `append` only commits if that revision is still current.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HistoryError;
use crate::message::{ConversationHistory, ConversationKey, Turn};

/// Opaque version token returned by reads and required by writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "generation", rename_all = "snake_case")]
pub enum StoredRevision {
    /// Nothing has been written for this key yet
    Absent,
    /// Storage generation of the object that was read or written
    Generation(u64),
}

impl StoredRevision {
    pub fn exists(&self) -> bool {
        matches!(self, Self::Generation(_))
    }
}

impl std::fmt::Display for StoredRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Generation(g) => write!(f, "gen:{g}"),
        }
    }
}

/// The core HistoryStore trait.
///
/// Implementations must be safe for concurrent use across invocations.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The backend name (e.g., "memory", "fs", "gcs").
    fn name(&self) -> &str;

    /// Read the whole history. Missing keys yield an empty history and
    /// [`StoredRevision::Absent`].
    async fn get(
        &self,
        key: &ConversationKey,
    ) -> std::result::Result<(ConversationHistory, StoredRevision), HistoryError>;

    /// Append `turns` at the tail if `expected` is still the current revision.
    ///
    /// Returns [`HistoryError::Conflict`] when `expected` is stale; nothing is
    /// written in that case.
    async fn append(
        &self,
        key: &ConversationKey,
        expected: StoredRevision,
        turns: &[Turn],
    ) -> std::result::Result<StoredRevision, HistoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_display_and_existence() {
        assert_eq!(StoredRevision::Absent.to_string(), "absent");
        assert_eq!(StoredRevision::Generation(7).to_string(), "gen:7");
        assert!(!StoredRevision::Absent.exists());
        assert!(StoredRevision::Generation(1).exists());
    }
}
