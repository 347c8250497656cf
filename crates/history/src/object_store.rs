//! Whole-object storage with conditional writes.
//!
//! The only primitive the history log needs from storage: read an object
//! together with its generation, and replace it only if the generation is
//! still the one we read.

use async_trait::async_trait;

/// An object as it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub generation: u64,
}

/// Condition a write must satisfy to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Only create; fail if the object already exists
    DoesNotExist,
    /// Only replace the object at exactly this generation
    GenerationMatch(u64),
}

impl Precondition {
    /// Whether a write is allowed given the current generation, if any.
    pub fn admits(&self, current: Option<u64>) -> bool {
        match (self, current) {
            (Self::DoesNotExist, None) => true,
            (Self::GenerationMatch(expected), Some(actual)) => *expected == actual,
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("Precondition failed for {name}")]
    PreconditionFailed { name: String },

    #[error("Object store unavailable: {0}")]
    Unavailable(String),

    #[error("Object store request timed out: {0}")]
    Timeout(String),
}

/// The ObjectStore trait. Implementations must be safe for concurrent use.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &str;

    /// Read an object. A missing object is `Ok(None)`.
    async fn get(&self, name: &str) -> Result<Option<StoredObject>, ObjectStoreError>;

    /// Write an object if `precondition` holds, returning the new generation.
    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        precondition: Precondition,
    ) -> Result<u64, ObjectStoreError>;
}
