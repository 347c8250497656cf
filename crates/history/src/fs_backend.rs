//! File-based object store: one file per object under a root directory.
//!
//! Each file holds its generation on the first line, followed by the object
//! bytes. Writes go to a temporary file that is renamed over the target, so
//! a reader never observes a half-written object.
//!
//! Conditional writes are serialized by an in-process lock: a directory must
//! not be shared by more than one running process.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::object_store::{ObjectStore, ObjectStoreError, Precondition, StoredObject};

pub struct FsObjectStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(root = %root.display(), "File object store ready");
        Self {
            root,
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.obj", encode_name(name)))
    }

    async fn read(&self, path: &Path) -> Result<Option<StoredObject>, ObjectStoreError> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ObjectStoreError::Unavailable(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let split = raw.iter().position(|b| *b == b'\n').ok_or_else(|| {
            ObjectStoreError::Unavailable(format!(
                "Missing generation header in {}",
                path.display()
            ))
        })?;
        let generation = std::str::from_utf8(&raw[..split])
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                ObjectStoreError::Unavailable(format!(
                    "Unreadable generation header in {}",
                    path.display()
                ))
            })?;

        Ok(Some(StoredObject {
            bytes: raw[split + 1..].to_vec(),
            generation,
        }))
    }
}

/// Map an object name onto a portable file name.
fn encode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn get(&self, name: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        self.read(&self.path_for(name)).await
    }

    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        precondition: Precondition,
    ) -> Result<u64, ObjectStoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(name);

        let current = self.read(&path).await?.map(|o| o.generation);
        if !precondition.admits(current) {
            return Err(ObjectStoreError::PreconditionFailed {
                name: name.to_string(),
            });
        }
        let generation = current.unwrap_or(0) + 1;

        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            ObjectStoreError::Unavailable(format!("Failed to create {}: {e}", self.root.display()))
        })?;

        let mut content = format!("{generation}\n").into_bytes();
        content.extend_from_slice(&bytes);

        let tmp = path.with_extension("obj.tmp");
        tokio::fs::write(&tmp, &content).await.map_err(|e| {
            ObjectStoreError::Unavailable(format!("Failed to write {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            ObjectStoreError::Unavailable(format!("Failed to replace {}: {e}", path.display()))
        })?;

        Ok(generation)
    }
}
