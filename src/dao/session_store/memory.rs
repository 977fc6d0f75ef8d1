//! In-process [`SessionStore`] used for single-node deployments and tests.

use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};

use crate::dao::{
    path::{DocumentRef, StorePath},
    session_store::{ChangeFeed, ChangeNotice, SessionStore, WriteBatch, tree},
    storage::StorageResult,
};
#[cfg(test)]
use crate::dao::storage::StorageError;

/// Documents held in a map guarded by a single lock, which serializes batches.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    documents: RwLock<HashMap<DocumentRef, Value>>,
    feed: ChangeFeed,
    #[cfg(test)]
    failing_collections: std::sync::Mutex<Vec<String>>,
    #[cfg(test)]
    slow_collections: std::sync::Mutex<Vec<(String, std::time::Duration)>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `collection` fail as if the backend were down.
    #[cfg(test)]
    pub(crate) fn fail_writes_to(&self, collection: &str) {
        if let Ok(mut guard) = self.inner.failing_collections.lock() {
            guard.push(collection.to_string());
        }
    }

    /// Hold every write to `collection` back by `delay` before applying it.
    #[cfg(test)]
    pub(crate) fn delay_writes_to(&self, collection: &str, delay: std::time::Duration) {
        if let Ok(mut guard) = self.inner.slow_collections.lock() {
            guard.push((collection.to_string(), delay));
        }
    }

    #[cfg(test)]
    fn injected_delay(&self, document: &DocumentRef) -> Option<std::time::Duration> {
        let guard = self.inner.slow_collections.lock().ok()?;
        guard
            .iter()
            .find(|(collection, _)| collection == document.collection())
            .map(|(_, delay)| *delay)
    }

    #[cfg(test)]
    fn injected_failure(&self, document: &DocumentRef) -> Option<StorageError> {
        let guard = self.inner.failing_collections.lock().ok()?;
        guard
            .iter()
            .any(|collection| collection == document.collection())
            .then(|| {
                StorageError::unavailable(
                    format!("injected failure for `{document}`"),
                    std::io::Error::other("injected"),
                )
            })
    }

    async fn read_path(&self, path: StorePath) -> StorageResult<Option<Value>> {
        path.validate()?;
        let documents = self.inner.documents.read().await;
        Ok(documents
            .get(path.document())
            .and_then(|document| tree::get(document, path.fields()))
            .cloned())
    }

    async fn apply_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        batch.validate()?;
        #[cfg(test)]
        if let Some(err) = self.injected_failure(batch.document()) {
            return Err(err);
        }
        #[cfg(test)]
        if let Some(delay) = self.injected_delay(batch.document()) {
            tokio::time::sleep(delay).await;
        }

        let mut documents = self.inner.documents.write().await;
        let next = tree::apply(documents.get(batch.document()), &batch)?;
        match next {
            Some(document) => {
                documents.insert(batch.document().clone(), document);
            }
            None => {
                documents.remove(batch.document());
            }
        }

        // Published under the lock so notices follow commit order.
        self.inner
            .feed
            .publish(batch.document().clone(), batch.touched_paths());
        Ok(())
    }
}

impl SessionStore for MemorySessionStore {
    fn read(&self, path: StorePath) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let store = self.clone();
        Box::pin(async move { store.read_path(path).await })
    }

    fn write_atomic(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.apply_batch(batch).await })
    }

    fn changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.inner.feed.subscribe()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dao::storage::ConflictKind;

    #[tokio::test]
    async fn concurrent_creates_on_one_path_admit_a_single_winner() {
        let store = MemorySessionStore::new();
        let doc = DocumentRef::new("quiz", "s1").unwrap();
        let answer = doc.field("players").field("u1").field("answers").field(0);
        let score = doc.field("players").field("u1").field("score");

        let attempts = (0..8).map(|i| {
            let batch = WriteBatch::new(doc.clone())
                .create(answer.clone(), json!({ "selectedOption": i }))
                .increment(score.clone(), 100);
            store.write_atomic(batch)
        });
        let results = futures::future::join_all(attempts).await;

        let accepted = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(accepted, 1);
        assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|err| matches!(
            err,
            StorageError::Conflict {
                kind: ConflictKind::AlreadyExists,
                ..
            }
        )));
        assert_eq!(store.read(score).await.unwrap(), Some(json!(100)));
    }

    #[tokio::test]
    async fn whole_document_delete_drops_it() {
        let store = MemorySessionStore::new();
        let doc = DocumentRef::new("codes", "123456").unwrap();
        store.set(doc.root(), json!({"sessionId": "s1"})).await.unwrap();
        assert!(store.read(doc.root()).await.unwrap().is_some());

        store.delete(doc.root()).await.unwrap();
        assert_eq!(store.read(doc.root()).await.unwrap(), None);
        assert!(store.inner.documents.read().await.is_empty());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_unavailable() {
        let store = MemorySessionStore::new();
        store.fail_writes_to("archives");
        let doc = DocumentRef::new("archives", "s1").unwrap();
        let err = store.set(doc.root(), json!({})).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { .. }));
    }
}
