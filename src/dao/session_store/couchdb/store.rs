use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::dao::{
    path::{DocumentRef, StorePath},
    session_store::{ChangeFeed, ChangeNotice, SessionStore, WriteBatch, tree},
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
};

/// Envelope stored in CouchDB; session data lives under `data` so that it
/// never collides with CouchDB's reserved underscore fields.
#[derive(Debug, Serialize, Deserialize)]
struct CouchEnvelope {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    rev: Option<String>,
    data: Value,
}

fn doc_id(document: &DocumentRef) -> String {
    format!("{}:{}", document.collection(), document.key())
}

/// CouchDB-backed [`SessionStore`]. Batches are applied with optimistic
/// concurrency on the document revision, retried on `409 Conflict`.
#[derive(Clone)]
pub struct CouchSessionStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    max_write_attempts: u32,
    feed: Arc<ChangeFeed>,
}

impl CouchSessionStore {
    /// Build the HTTP client and make sure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let store = Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            database: Arc::from(config.database),
            auth: config
                .username
                .zip(config.password)
                .map(|(user, pass)| (Arc::from(user), Arc::from(pass))),
            max_write_attempts: config.max_write_attempts.max(1),
            feed: Arc::new(ChangeFeed::new()),
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some((user, pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn request(&self, method: Method, doc_id: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.database_url(), doc_id);
        self.authorized(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let url = self.database_url();
        let database = self.database.to_string();
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: url.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let created = self
                    .authorized(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                // 412 means a concurrent instance created it first.
                match created.status() {
                    status if status.is_success() => Ok(()),
                    StatusCode::PRECONDITION_FAILED => Ok(()),
                    status => Err(CouchDaoError::DatabaseStatus { database, status }),
                }
            }
            status => Err(CouchDaoError::DatabaseStatus { database, status }),
        }
    }

    async fn fetch(&self, doc_id: &str) -> CouchResult<Option<CouchEnvelope>> {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CouchEnvelope>()
                .await
                .map(Some)
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: doc_id.to_string(),
                    source,
                }),
            status => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status,
            }),
        }
    }

    /// Write the new revision (or delete), returning `false` on a revision conflict.
    async fn store_revision(
        &self,
        doc_id: &str,
        rev: Option<String>,
        next: Option<Value>,
    ) -> CouchResult<bool> {
        let request = match (next, rev) {
            (Some(data), rev) => self.request(Method::PUT, doc_id).json(&CouchEnvelope {
                id: doc_id.to_string(),
                rev,
                data,
            }),
            (None, Some(rev)) => self
                .request(Method::DELETE, doc_id)
                .query(&[("rev", rev)]),
            (None, None) => return Ok(true),
        };

        let response = request
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status,
            }),
        }
    }

    async fn read_path(&self, path: StorePath) -> StorageResult<Option<Value>> {
        path.validate()?;
        let envelope = self.fetch(&doc_id(path.document())).await?;
        Ok(envelope.and_then(|envelope| tree::get(&envelope.data, path.fields()).cloned()))
    }

    async fn apply_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        batch.validate()?;
        let id = doc_id(batch.document());

        for attempt in 1..=self.max_write_attempts {
            let current = self.fetch(&id).await?;
            let (rev, data) = match current {
                Some(envelope) => (envelope.rev, Some(envelope.data)),
                None => (None, None),
            };
            // Precondition failures are final; only revision races are retried.
            let next = tree::apply(data.as_ref(), &batch)?;

            if self.store_revision(&id, rev, next).await? {
                self.feed
                    .publish(batch.document().clone(), batch.touched_paths());
                return Ok(());
            }
            debug!(document = %id, attempt, "CouchDB revision conflict, retrying batch");
        }

        Err(CouchDaoError::Contended {
            path: id,
            attempts: self.max_write_attempts,
        }
        .into())
    }
}

impl SessionStore for CouchSessionStore {
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
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorized(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn backend_name(&self) -> &'static str {
        "couchdb"
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
