//! The history store: one document per conversation over an [`ObjectStore`].

use async_trait::async_trait;
use replybot_core::error::HistoryError;
use replybot_core::history::{HistoryStore, StoredRevision};
use replybot_core::message::{ConversationHistory, ConversationKey, Turn};
use std::sync::Arc;
use tracing::debug;

use crate::codec::HistoryDocument;
use crate::object_store::{ObjectStore, ObjectStoreError, Precondition};

/// Append-only history with read-modify-write under a generation check.
///
/// `append` re-reads the object, refuses if its generation differs from
/// `expected`, then writes the concatenation conditionally on that same
/// generation. Either check failing yields [`HistoryError::Conflict`];
/// retrying is up to the caller.
pub struct ObjectHistoryStore {
    objects: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectHistoryStore {
    pub fn new(objects: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            objects,
            prefix: prefix.into(),
        }
    }

    fn object_name(&self, key: &ConversationKey) -> String {
        format!("{}{}.json", self.prefix, key)
    }

    async fn load(
        &self,
        key: &ConversationKey,
    ) -> Result<(Vec<Turn>, StoredRevision), HistoryError> {
        let name = self.object_name(key);
        let Some(object) = self.objects.get(&name).await.map_err(|e| storage_error(key, e))?
        else {
            return Ok((Vec::new(), StoredRevision::Absent));
        };

        let doc = HistoryDocument::decode(key, &object.bytes).map_err(|reason| {
            HistoryError::Corrupt {
                key: key.to_string(),
                reason,
            }
        })?;
        Ok((doc.turns, StoredRevision::Generation(object.generation)))
    }
}

fn storage_error(key: &ConversationKey, e: ObjectStoreError) -> HistoryError {
    match e {
        ObjectStoreError::PreconditionFailed { .. } => HistoryError::Conflict {
            key: key.to_string(),
        },
        ObjectStoreError::Unavailable(reason) => HistoryError::Unavailable(reason),
        ObjectStoreError::Timeout(reason) => HistoryError::Timeout(reason),
    }
}

#[async_trait]
impl HistoryStore for ObjectHistoryStore {
    fn name(&self) -> &str {
        self.objects.name()
    }

    async fn get(
        &self,
        key: &ConversationKey,
    ) -> Result<(ConversationHistory, StoredRevision), HistoryError> {
        let (turns, revision) = self.load(key).await?;
        debug!(conversation = %key, turns = turns.len(), %revision, "Loaded history");
        Ok((ConversationHistory::from_turns(turns), revision))
    }

    async fn append(
        &self,
        key: &ConversationKey,
        expected: StoredRevision,
        turns: &[Turn],
    ) -> Result<StoredRevision, HistoryError> {
        let (mut stored, current) = self.load(key).await?;
        if current != expected {
            return Err(HistoryError::Conflict {
                key: key.to_string(),
            });
        }
        if turns.is_empty() {
            return Ok(current);
        }

        stored.extend_from_slice(turns);
        let bytes = HistoryDocument::new(key.clone(), stored)
            .encode()
            .map_err(|e| HistoryError::Unavailable(format!("Failed to encode history: {e}")))?;

        let precondition = match expected {
            StoredRevision::Absent => Precondition::DoesNotExist,
            StoredRevision::Generation(g) => Precondition::GenerationMatch(g),
        };
        let generation = self
            .objects
            .put(&self.object_name(key), bytes, precondition)
            .await
            .map_err(|e| storage_error(key, e))?;

        debug!(conversation = %key, appended = turns.len(), generation, "Appended history");
        Ok(StoredRevision::Generation(generation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryObjectStore;

    fn store() -> (ObjectHistoryStore, Arc<InMemoryObjectStore>) {
        let objects = Arc::new(InMemoryObjectStore::new());
        (ObjectHistoryStore::new(objects.clone(), "history/"), objects)
    }

    fn batch(tag: &str, n: usize) -> Vec<Turn> {
        (0..n).map(|i| Turn::user(format!("{tag}-{i}"))).collect()
    }

    #[tokio::test]
    async fn missing_key_is_empty_and_absent() {
        let (store, _) = store();
        let (history, revision) = store.get(&ConversationKey::user("U1")).await.unwrap();
        assert!(history.is_empty());
        assert_eq!(revision, StoredRevision::Absent);
    }

    #[tokio::test]
    async fn appends_concatenate_in_commit_order() {
        let (store, _) = store();
        let key = ConversationKey::group("G1");

        let r1 = store
            .append(&key, StoredRevision::Absent, &batch("a", 2))
            .await
            .unwrap();
        let r2 = store.append(&key, r1, &batch("b", 3)).await.unwrap();

        let (history, revision) = store.get(&key).await.unwrap();
        assert_eq!(revision, r2);
        let mut expected = batch("a", 2);
        expected.extend(batch("b", 3));
        assert_eq!(history.turns(), expected.as_slice());
    }

    #[tokio::test]
    async fn stale_revision_conflicts_and_writes_nothing() {
        let (store, _) = store();
        let key = ConversationKey::user("U1");
        let r1 = store
            .append(&key, StoredRevision::Absent, &batch("a", 1))
            .await
            .unwrap();
        store.append(&key, r1, &batch("b", 1)).await.unwrap();

        let err = store.append(&key, r1, &batch("c", 1)).await.unwrap_err();
        assert!(err.is_conflict());

        let err = store
            .append(&key, StoredRevision::Absent, &batch("d", 1))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        assert_eq!(store.get(&key).await.unwrap().0.len(), 2);
    }

    #[tokio::test]
    async fn same_revision_race_has_one_winner() {
        let (store, _) = store();
        let key = ConversationKey::room("R1");
        let (_, revision) = store.get(&key).await.unwrap();

        let first_batch = batch("first", 2);
        let second_batch = batch("second", 2);
        let (first, second) = tokio::join!(
            store.append(&key, revision, &first_batch),
            store.append(&key, revision, &second_batch),
        );
        let (winner, loser_batch, loser_err) = match (first, second) {
            (Ok(r), Err(e)) => (r, batch("second", 2), e),
            (Err(e), Ok(r)) => (r, batch("first", 2), e),
            other => panic!("expected exactly one winner, got {other:?}"),
        };
        assert!(loser_err.is_conflict());

        // The loser retries from a fresh read and sees the winner's turns.
        let (history, fresh) = store.get(&key).await.unwrap();
        assert_eq!(fresh, winner);
        assert_eq!(history.len(), 2);
        store.append(&key, fresh, &loser_batch).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().0.len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_lose_nothing() {
        let objects = Arc::new(InMemoryObjectStore::new());
        let store = Arc::new(ObjectHistoryStore::new(objects, ""));
        let key = ConversationKey::group("busy");

        let mut handles = Vec::new();
        for writer in 0..8usize {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                let turns = batch(&format!("w{writer}"), writer + 1);
                loop {
                    let (_, revision) = store.get(&key).await.unwrap();
                    match store.append(&key, revision, &turns).await {
                        Ok(_) => break,
                        Err(e) if e.is_conflict() => tokio::task::yield_now().await,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            }));
        }
        futures::future::join_all(handles).await;

        let (history, _) = store.get(&key).await.unwrap();
        assert_eq!(history.len(), (1..=8).sum::<usize>());

        // Each batch landed contiguously.
        for writer in 0..8usize {
            let first = format!("w{writer}-0");
            let start = history
                .turns()
                .iter()
                .position(|t| *t == Turn::user(first.clone()))
                .unwrap();
            let expected = batch(&format!("w{writer}"), writer + 1);
            assert_eq!(&history.turns()[start..start + writer + 1], expected.as_slice());
        }
    }

    #[tokio::test]
    async fn corrupt_blob_is_distinct_from_missing() {
        let (store, objects) = store();
        let key = ConversationKey::user("U1");
        objects
            .put("history/user:U1.json", b"{oops".to_vec(), Precondition::DoesNotExist)
            .await
            .unwrap();

        let err = store.get(&key).await.unwrap_err();
        assert!(matches!(err, HistoryError::Corrupt { .. }));
        let err = store
            .append(&key, StoredRevision::Generation(1), &batch("a", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn keys_are_isolated() {
        let (store, _) = store();
        store
            .append(&ConversationKey::user("U1"), StoredRevision::Absent, &batch("a", 3))
            .await
            .unwrap();
        let (other, revision) = store.get(&ConversationKey::user("U2")).await.unwrap();
        assert!(other.is_empty());
        assert_eq!(revision, StoredRevision::Absent);
    }
}
