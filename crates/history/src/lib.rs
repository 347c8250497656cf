//! Conversation history storage for replybot.
//!
//! History is kept as one JSON document per conversation key inside an
//! object store that supports conditional writes. Backends:
//! - `memory`: in-process, lost on restart
//! - `fs`: one file per object under a directory
//! - `gcs`: Google Cloud Storage JSON API

pub mod codec;
pub mod fs_backend;
pub mod gcs;
pub mod in_memory;
pub mod object_store;
pub mod store;

pub use codec::HistoryDocument;
pub use fs_backend::FsObjectStore;
pub use gcs::GcsObjectStore;
pub use in_memory::InMemoryObjectStore;
pub use object_store::{ObjectStore, ObjectStoreError, Precondition, StoredObject};
pub use store::ObjectHistoryStore;

use replybot_config::{HistoryBackend, HistoryConfig};
use std::sync::Arc;
use std::time::Duration;

/// Open the object store selected by `config`.
pub fn open_object_store(
    config: &HistoryConfig,
    timeout: Duration,
) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
    match config.backend {
        HistoryBackend::Memory => Ok(Arc::new(InMemoryObjectStore::new())),
        HistoryBackend::Fs => {
            let path = config.path.clone().ok_or_else(|| {
                ObjectStoreError::Unavailable("history.path is not set".into())
            })?;
            Ok(Arc::new(FsObjectStore::new(path)))
        }
        HistoryBackend::Gcs => {
            let bucket = config.bucket.clone().ok_or_else(|| {
                ObjectStoreError::Unavailable("history.bucket is not set".into())
            })?;
            Ok(Arc::new(GcsObjectStore::new(
                bucket,
                config.access_token.clone(),
                config.api_url.as_deref(),
                timeout,
            )?))
        }
    }
}
