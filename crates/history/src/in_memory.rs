//! In-memory object store: fast, ephemeral, used by tests and the `memory` backend.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::object_store::{ObjectStore, ObjectStoreError, Precondition, StoredObject};

/// Objects live in a map; generations come from one shared counter so a
/// recreated object never reuses an old generation.
pub struct InMemoryObjectStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<String, StoredObject>,
    next_generation: u64,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                objects: HashMap::new(),
                next_generation: 1,
            })),
        }
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.inner.read().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, name: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        Ok(self.inner.read().await.objects.get(name).cloned())
    }

    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        precondition: Precondition,
    ) -> Result<u64, ObjectStoreError> {
        let mut inner = self.inner.write().await;
        let current = inner.objects.get(name).map(|o| o.generation);
        if !precondition.admits(current) {
            return Err(ObjectStoreError::PreconditionFailed {
                name: name.to_string(),
            });
        }
        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner
            .objects
            .insert(name.to_string(), StoredObject { bytes, generation });
        Ok(generation)
    }
}
