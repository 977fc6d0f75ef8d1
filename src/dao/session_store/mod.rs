//! Session store adapter: a path-addressable JSON store with atomic
//! single-document batches and push-based change notification.

#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;
pub(crate) mod tree;

use std::sync::Arc;

use async_stream::stream;
use futures::{Stream, future::BoxFuture};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::dao::{
    path::{DocumentRef, StorePath},
    storage::{StorageError, StorageResult},
};

const CHANGE_FEED_CAPACITY: usize = 256;

/// Abstraction over the persistence layer holding live session documents.
///
/// Implementations must apply a [`WriteBatch`] indivisibly: subscribers either
/// observe none of its effects or all of them.
pub trait SessionStore: Send + Sync {
    /// Read the value stored at `path`, `None` when absent.
    fn read(&self, path: StorePath) -> BoxFuture<'static, StorageResult<Option<Value>>>;
    /// Apply every precondition and mutation of `batch` as one unit.
    fn write_atomic(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<()>>;
    /// Receive a notice for every committed batch.
    fn changes(&self) -> broadcast::Receiver<ChangeNotice>;
    /// Check that the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Short backend identifier used in logs.
    fn backend_name(&self) -> &'static str;

    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Overwrite a single path.
    fn set(&self, path: StorePath, value: Value) -> BoxFuture<'static, StorageResult<()>> {
        let batch = WriteBatch::new(path.document().clone()).set(path, value);
        self.write_atomic(batch)
    }

    /// Remove a single path (and everything below it).
    fn delete(&self, path: StorePath) -> BoxFuture<'static, StorageResult<()>> {
        let batch = WriteBatch::new(path.document().clone()).delete(path);
        self.write_atomic(batch)
    }
}

/// Shared handle to whichever backend is installed.
pub type SharedStore = Arc<dyn SessionStore>;

/// Condition a path must satisfy for a batch to commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// The path holds exactly this value.
    Equals(Value),
    /// The path holds any non-null value.
    Present,
    /// The path is absent (or null).
    Absent,
}

/// Change applied to a path once every precondition holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Replace the value (setting `null` deletes).
    Set(Value),
    /// Add to an integer counter, treating an absent counter as zero.
    Increment(i64),
    /// Remove the value and everything below it.
    Delete,
}

/// Preconditions and mutations targeting a single document.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    document: DocumentRef,
    checks: Vec<(StorePath, Precondition)>,
    mutations: Vec<(StorePath, Mutation)>,
}

impl WriteBatch {
    /// Start an empty batch for `document`.
    pub fn new(document: DocumentRef) -> Self {
        Self {
            document,
            checks: Vec::new(),
            mutations: Vec::new(),
        }
    }

    /// Require `path` to currently equal `value`.
    pub fn expect(mut self, path: StorePath, value: impl Into<Value>) -> Self {
        self.checks.push((path, Precondition::Equals(value.into())));
        self
    }

    /// Require `path` to currently hold a value.
    pub fn expect_present(mut self, path: StorePath) -> Self {
        self.checks.push((path, Precondition::Present));
        self
    }

    /// Require `path` to be currently absent.
    pub fn expect_absent(mut self, path: StorePath) -> Self {
        self.checks.push((path, Precondition::Absent));
        self
    }

    /// Write `value` at `path` only if nothing is stored there yet.
    pub fn create(self, path: StorePath, value: impl Into<Value>) -> Self {
        self.expect_absent(path.clone()).set(path, value)
    }

    /// Overwrite `path` with `value`.
    pub fn set(mut self, path: StorePath, value: impl Into<Value>) -> Self {
        self.mutations.push((path, Mutation::Set(value.into())));
        self
    }

    /// Add `by` to the integer counter at `path`.
    pub fn increment(mut self, path: StorePath, by: i64) -> Self {
        self.mutations.push((path, Mutation::Increment(by)));
        self
    }

    /// Remove `path`.
    pub fn delete(mut self, path: StorePath) -> Self {
        self.mutations.push((path, Mutation::Delete));
        self
    }

    /// Document targeted by the batch.
    pub fn document(&self) -> &DocumentRef {
        &self.document
    }

    /// Preconditions in insertion order.
    pub fn checks(&self) -> &[(StorePath, Precondition)] {
        &self.checks
    }

    /// Mutations in insertion order.
    pub fn mutations(&self) -> &[(StorePath, Mutation)] {
        &self.mutations
    }

    /// Paths whose subscribers must be notified once the batch commits.
    pub fn touched_paths(&self) -> Vec<StorePath> {
        self.mutations.iter().map(|(path, _)| path.clone()).collect()
    }

    /// Reject batches that leave their document or carry no mutation.
    pub fn validate(&self) -> StorageResult<()> {
        if self.mutations.is_empty() {
            return Err(StorageError::InvalidBatch(format!(
                "batch on `{}` has no mutation",
                self.document
            )));
        }

        self.checks
            .iter()
            .map(|(path, _)| path)
            .chain(self.mutations.iter().map(|(path, _)| path))
            .try_for_each(|path| {
                if path.document() != &self.document {
                    return Err(StorageError::InvalidBatch(format!(
                        "path `{path}` is outside of batch document `{}`",
                        self.document
                    )));
                }
                path.validate()
            })
    }
}

/// Notice broadcast after a batch commits.
#[derive(Debug, Clone)]
pub struct ChangeNotice {
    /// Document the batch was applied to.
    pub document: DocumentRef,
    /// Paths mutated by the batch.
    pub paths: Arc<[StorePath]>,
}

impl ChangeNotice {
    /// Whether a subscriber on `path` must re-read after this notice.
    pub fn affects(&self, path: &StorePath) -> bool {
        &self.document == path.document() && self.paths.iter().any(|changed| changed.overlaps(path))
    }
}

/// Broadcast fan-out of [`ChangeNotice`]s shared by every backend.
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeNotice>,
}

impl ChangeFeed {
    /// Build a feed with the default channel capacity.
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { sender }
    }

    /// Register a new listener.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.sender.subscribe()
    }

    /// Announce a committed batch, ignoring the absence of listeners.
    pub fn publish(&self, document: DocumentRef, paths: Vec<StorePath>) {
        let _ = self.sender.send(ChangeNotice {
            document,
            paths: paths.into(),
        });
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Live view on one path. Yields the current value first, then the latest
/// value after every committed batch touching the path; `None` means deleted.
pub struct Subscription {
    store: SharedStore,
    path: StorePath,
    receiver: broadcast::Receiver<ChangeNotice>,
    primed: bool,
}

/// Subscribe to changes at or below `path`. Dropping the subscription unsubscribes.
pub fn subscribe(store: &SharedStore, path: StorePath) -> Subscription {
    Subscription {
        receiver: store.changes(),
        store: store.clone(),
        path,
        primed: false,
    }
}

impl Subscription {
    /// Wait for the next value. Returns `None` once the store shuts its feed down.
    pub async fn next(&mut self) -> Option<StorageResult<Option<Value>>> {
        if !self.primed {
            self.primed = true;
            return Some(self.store.read(self.path.clone()).await);
        }

        loop {
            match self.receiver.recv().await {
                Ok(notice) if notice.affects(&self.path) => break,
                Ok(_) => continue,
                // Missed notices are coalesced into one fresh read.
                Err(RecvError::Lagged(_)) => break,
                Err(RecvError::Closed) => return None,
            }
        }

        Some(self.store.read(self.path.clone()).await)
    }

    /// Turn the subscription into a stream of values.
    pub fn into_stream(self) -> impl Stream<Item = StorageResult<Option<Value>>> + Send {
        let mut subscription = self;
        stream! {
            while let Some(item) = subscription.next().await {
                yield item;
            }
        }
    }
}

/// Serialize a value destined for `path`.
pub fn encode<T: Serialize>(path: &StorePath, value: &T) -> StorageResult<Value> {
    serde_json::to_value(value).map_err(|err| StorageError::Corrupt {
        path: path.to_string(),
        reason: err.to_string(),
    })
}

/// Read and deserialize the value at `path`.
pub async fn read_as<T: DeserializeOwned>(
    store: &SharedStore,
    path: StorePath,
) -> StorageResult<Option<T>> {
    let display = path.to_string();
    match store.read(path).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|err| StorageError::Corrupt {
                path: display,
                reason: err.to_string(),
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{memory::MemorySessionStore, *};

    fn doc() -> DocumentRef {
        DocumentRef::new("quiz", "s1").unwrap()
    }

    #[test]
    fn batch_rejects_foreign_paths() {
        let other = DocumentRef::new("quiz", "s2").unwrap();
        let batch = WriteBatch::new(doc()).set(other.field("status"), "playing");
        assert!(matches!(
            batch.validate(),
            Err(StorageError::InvalidBatch(_))
        ));
    }

    #[test]
    fn batch_without_mutation_is_invalid() {
        let batch = WriteBatch::new(doc()).expect(doc().field("status"), "playing");
        assert!(batch.validate().is_err());
    }

    #[tokio::test]
    async fn subscription_sees_initial_value_then_updates_then_deletion() {
        let store: SharedStore = Arc::new(MemorySessionStore::new());
        store
            .set(doc().field("status"), json!("waiting"))
            .await
            .unwrap();

        let mut sub = subscribe(&store, doc().field("status"));
        assert_eq!(sub.next().await.unwrap().unwrap(), Some(json!("waiting")));

        // Unrelated sibling paths do not wake the subscriber.
        store.set(doc().field("title"), json!("x")).await.unwrap();
        store
            .set(doc().field("status"), json!("playing"))
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap(), Some(json!("playing")));

        store.delete(doc().root()).await.unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn parent_subscription_observes_child_writes() {
        let store: SharedStore = Arc::new(MemorySessionStore::new());
        let mut sub = subscribe(&store, doc().field("players"));
        assert_eq!(sub.next().await.unwrap().unwrap(), None);

        store
            .write_atomic(
                WriteBatch::new(doc())
                    .set(doc().field("players").field("u1").field("score"), 0)
                    .set(doc().field("players").field("u1").field("name"), "Ada"),
            )
            .await
            .unwrap();

        assert_eq!(
            sub.next().await.unwrap().unwrap(),
            Some(json!({"u1": {"score": 0, "name": "Ada"}}))
        );
    }
}
