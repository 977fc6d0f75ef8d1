use std::sync::Arc;

use futures::future::BoxFuture;
use mongodb::{
    Collection,
    bson::{Bson, Document, doc},
    error::{Error as MongoError, ErrorKind, WriteFailure},
};
use serde_json::{Map, Number, Value};
use tokio::sync::broadcast;

use crate::dao::{
    path::{DocumentRef, StorePath},
    session_store::{ChangeFeed, ChangeNotice, Mutation, Precondition, SessionStore, WriteBatch, tree},
    storage::{ConflictKind, StorageError, StorageResult},
};

use super::{MongoDaoError, MongoManager};

const DUPLICATE_KEY: i32 = 11000;

/// MongoDB-backed [`SessionStore`]: one collection per store collection, one
/// Mongo document per store document, each batch compiled into one
/// conditional single-document update (which MongoDB applies atomically).
#[derive(Clone)]
pub struct MongoSessionStore {
    mongo: MongoManager,
    feed: Arc<ChangeFeed>,
}

impl MongoSessionStore {
    /// Wrap a connected manager.
    pub fn new(mongo: MongoManager) -> Self {
        Self {
            mongo,
            feed: Arc::new(ChangeFeed::new()),
        }
    }

    async fn collection(&self, document: &DocumentRef) -> Collection<Document> {
        self.mongo
            .database()
            .await
            .collection::<Document>(document.collection())
    }

    async fn load(&self, document: &DocumentRef) -> Result<Option<Value>, MongoDaoError> {
        let found = self
            .collection(document)
            .await
            .find_one(doc! { "_id": document.key() })
            .await
            .map_err(|source| MongoDaoError::Read {
                document: document.to_string(),
                source,
            })?;

        Ok(found.and_then(|mut raw| {
            raw.remove("_id");
            (!raw.is_empty()).then(|| bson_to_json(Bson::Document(raw)))
        }))
    }

    async fn read_path(&self, path: StorePath) -> StorageResult<Option<Value>> {
        path.validate()?;
        let document = self.load(path.document()).await?;
        Ok(document.and_then(|value| tree::get(&value, path.fields()).cloned()))
    }

    async fn apply_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        batch.validate()?;
        let document = batch.document().clone();
        let filter = build_filter(&batch);
        let may_create = batch
            .checks()
            .iter()
            .all(|(_, precondition)| *precondition == Precondition::Absent);
        let collection = self.collection(&document).await;

        if requires_new_document(&batch) {
            return self.insert_new(&collection, batch).await;
        }

        let committed = match root_mutation(&batch)? {
            Some(Mutation::Delete) | Some(Mutation::Set(Value::Null)) => {
                let result = collection
                    .delete_one(filter)
                    .await
                    .map_err(|source| write_error(&document, source))?;
                // Deleting a missing document is a no-op once the checks hold.
                result.deleted_count > 0 || self.recheck(&batch).await?.is_none()
            }
            Some(Mutation::Set(value)) => {
                let mut replacement = match json_to_bson(value) {
                    Bson::Document(replacement) => replacement,
                    _ => {
                        return Err(StorageError::InvalidBatch(format!(
                            "document `{document}` must be replaced by an object"
                        )));
                    }
                };
                replacement.insert("_id", document.key());
                match collection.replace_one(filter, replacement).upsert(may_create).await {
                    Ok(result) => result.matched_count > 0 || result.upserted_id.is_some(),
                    Err(err) if is_duplicate_key(&err) => false,
                    Err(source) => return Err(write_error(&document, source).into()),
                }
            }
            Some(Mutation::Increment(_)) => {
                return Err(StorageError::InvalidBatch(
                    "cannot increment a whole document".into(),
                ));
            }
            None => {
                let update = build_update(&batch);
                match collection.update_one(filter, update).upsert(may_create).await {
                    Ok(result) => result.matched_count > 0 || result.upserted_id.is_some(),
                    Err(err) if is_duplicate_key(&err) => false,
                    Err(source) => return Err(write_error(&document, source).into()),
                }
            }
        };

        if !committed {
            return Err(self.recheck(&batch).await?.unwrap_or_else(|| {
                // The conflicting write may have been undone since; report the document.
                StorageError::Conflict {
                    path: batch.document().to_string(),
                    kind: ConflictKind::Mismatch,
                }
            }));
        }

        self.feed.publish(document, batch.touched_paths());
        Ok(())
    }

    /// Batches guarded by an `Absent` check on the document itself become a
    /// plain insert, relying on the `_id` unique index for first-writer-wins.
    async fn insert_new(&self, collection: &Collection<Document>, batch: WriteBatch) -> StorageResult<()> {
        let document = batch.document().clone();
        let Some(value) = tree::apply(None, &batch)? else {
            return Ok(());
        };
        let mut fresh = match json_to_bson(&value) {
            Bson::Document(fresh) => fresh,
            _ => {
                return Err(StorageError::InvalidBatch(format!(
                    "document `{document}` must be created as an object"
                )));
            }
        };
        fresh.insert("_id", document.key());

        match collection.insert_one(fresh).await {
            Ok(_) => {
                self.feed.publish(document, batch.touched_paths());
                Ok(())
            }
            Err(err) if is_duplicate_key(&err) => Err(StorageError::Conflict {
                path: document.to_string(),
                kind: ConflictKind::AlreadyExists,
            }),
            Err(source) => Err(write_error(&document, source).into()),
        }
    }

    /// Re-read the document and report the first precondition it violates.
    async fn recheck(&self, batch: &WriteBatch) -> StorageResult<Option<StorageError>> {
        let current = self.load(batch.document()).await?.unwrap_or(Value::Null);
        Ok(batch
            .checks()
            .iter()
            .find_map(|(path, precondition)| tree::check(&current, path, precondition).err()))
    }
}

impl SessionStore for MongoSessionStore {
    fn read(&self, path: StorePath) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let store = self.clone();
        Box::pin(async move { store.read_path(path).await })
    }

    fn write_atomic(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.apply_batch(batch).await })
    }

    fn changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.feed.subscribe()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let mongo = self.mongo.clone();
        Box::pin(async move { mongo.ping().await.map_err(Into::into) })
    }

    fn backend_name(&self) -> &'static str {
        "mongodb"
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let mongo = self.mongo.clone();
        Box::pin(async move { mongo.reconnect().await.map_err(Into::into) })
    }
}

fn requires_new_document(batch: &WriteBatch) -> bool {
    batch
        .checks()
        .iter()
        .any(|(path, precondition)| path.is_document_root() && *precondition == Precondition::Absent)
}

/// A mutation of the whole document must be the only mutation of its batch.
fn root_mutation(batch: &WriteBatch) -> StorageResult<Option<&Mutation>> {
    let root = batch
        .mutations()
        .iter()
        .find(|(path, _)| path.is_document_root())
        .map(|(_, mutation)| mutation);

    if root.is_some() && batch.mutations().len() > 1 {
        return Err(StorageError::InvalidBatch(
            "a whole-document mutation cannot be combined with field mutations".into(),
        ));
    }
    Ok(root)
}

fn dotted(path: &StorePath) -> String {
    path.fields().join(".")
}

fn build_filter(batch: &WriteBatch) -> Document {
    let conditions = batch
        .checks()
        .iter()
        // Root checks reduce to the `_id` match (or to an insert, see `requires_new_document`).
        .filter(|(path, _)| !path.is_document_root())
        .map(|(path, precondition)| {
            let field = dotted(path);
            match precondition {
                // `null` also matches a missing field.
                Precondition::Absent => doc! { field: Bson::Null },
                Precondition::Present => doc! { field: { "$ne": Bson::Null } },
                Precondition::Equals(value) => doc! { field: json_to_bson(value) },
            }
        })
        .collect::<Vec<_>>();

    let mut filter = doc! { "_id": batch.document().key() };
    if !conditions.is_empty() {
        filter.insert("$and", conditions);
    }
    filter
}

fn build_update(batch: &WriteBatch) -> Document {
    let mut set = Document::new();
    let mut unset = Document::new();
    let mut inc = Document::new();

    for (path, mutation) in batch.mutations() {
        let field = dotted(path);
        match mutation {
            Mutation::Set(Value::Null) | Mutation::Delete => {
                unset.insert(field, "");
            }
            Mutation::Set(value) => {
                set.insert(field, json_to_bson(value));
            }
            Mutation::Increment(by) => {
                inc.insert(field, Bson::Int64(*by));
            }
        }
    }

    let mut update = Document::new();
    for (operator, fields) in [("$set", set), ("$unset", unset), ("$inc", inc)] {
        if !fields.is_empty() {
            update.insert(operator, fields);
        }
    }
    update
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

fn write_error(document: &DocumentRef, source: MongoError) -> MongoDaoError {
    MongoDaoError::Write {
        document: document.to_string(),
        source,
    }
}

fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(flag) => Bson::Boolean(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => Bson::Int64(integer),
            None => Bson::Double(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => Bson::String(text.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => {
            let mut document = Document::new();
            for (key, item) in map {
                document.insert(key.clone(), json_to_bson(item));
            }
            Bson::Document(document)
        }
    }
}

fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(flag) => Value::Bool(flag),
        Bson::Int32(integer) => Value::from(integer),
        Bson::Int64(integer) => Value::from(integer),
        Bson::Double(float) => Number::from_f64(float).map_or(Value::Null, Value::Number),
        Bson::String(text) => Value::String(text),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::Document(document) => Value::Object(
            document
                .into_iter()
                .map(|(key, item)| (key.to_string(), bson_to_json(item)))
                .collect::<Map<_, _>>(),
        ),
        other => Value::String(other.to_string()),
    }
}
