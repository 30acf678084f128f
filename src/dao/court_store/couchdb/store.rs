use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value};
use tracing::debug;

use crate::dao::{
    court_store::CourtStore,
    models::{HistoryEntity, SnapshotEntity},
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, CouchHistoryDocument, CouchSnapshotDocument, END_SUFFIX, HISTORY_PREFIX,
        SNAPSHOT_PREFIX, snapshot_doc_id,
    },
};

const ALL_DOCS: &str = "_all_docs";

/// Key range of an `_all_docs` scan.
struct DocRange<'a> {
    prefix: &'a str,
    descending: bool,
    limit: Option<usize>,
}

#[derive(Clone)]
pub struct CouchCourtStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchCourtStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url);
        let database = Arc::<str>::from(config.database);
        let auth = config
            .credentials
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.database_url(), path);
        self.authorize(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
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
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<()>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: response.status(),
            })
        }
    }

    async fn delete_document(&self, doc_id: &str, rev: &str) -> CouchResult<()> {
        let response = self
            .request(Method::DELETE, doc_id)
            .query(&[("rev", rev)])
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: response.status(),
            })
        }
    }

    async fn list_documents<T>(&self, range: DocRange<'_>) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let low = format!("\"{}\"", range.prefix);
        let high = format!("\"{}{}\"", range.prefix, END_SUFFIX);
        let (startkey, endkey) = if range.descending {
            (high, low)
        } else {
            (low, high)
        };
        let mut query = vec![
            ("include_docs", "true".to_string()),
            ("startkey", startkey),
            ("endkey", endkey),
        ];
        if range.descending {
            query.push(("descending", "true".to_string()));
        }
        if let Some(limit) = range.limit {
            query.push(("limit", limit.to_string()));
        }

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        let mut documents = Vec::new();
        for row in payload.rows {
            if let Some(doc) = row.doc {
                let parsed = from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: row.id,
                    source,
                })?;
                documents.push(parsed);
            }
        }

        Ok(documents)
    }
}

impl CourtStore for CouchCourtStore {
    fn persist_snapshot(&self, kort_id: String, snapshot: Value) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = snapshot_doc_id(&kort_id);
            let rev = store
                .get_document::<CouchSnapshotDocument>(&doc_id)
                .await?
                .and_then(|existing| existing.rev);
            let doc = CouchSnapshotDocument::from((
                SnapshotEntity {
                    kort_id,
                    state: snapshot,
                },
                rev,
            ));
            store.put_document(&doc_id, &doc).await.map_err(Into::into)
        })
    }

    fn load_snapshots(&self) -> BoxFuture<'static, StorageResult<HashMap<String, Value>>> {
        let store = self.clone();
        Box::pin(async move {
            let docs = store
                .list_documents::<CouchSnapshotDocument>(DocRange {
                    prefix: SNAPSHOT_PREFIX,
                    descending: false,
                    limit: None,
                })
                .await?;
            Ok(docs
                .into_iter()
                .map(|doc| (doc.snapshot.kort_id, doc.snapshot.state))
                .collect())
        })
    }

    fn append_history(&self, entry: HistoryEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = CouchHistoryDocument::from(entry);
            store.put_document(&doc.id, &doc).await.map_err(Into::into)
        })
    }

    fn delete_latest_history(&self) -> BoxFuture<'static, StorageResult<Option<HistoryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let latest = store
                .list_documents::<CouchHistoryDocument>(DocRange {
                    prefix: HISTORY_PREFIX,
                    descending: true,
                    limit: Some(1),
                })
                .await?
                .into_iter()
                .next();
            let Some(doc) = latest else {
                return Ok(None);
            };
            let rev = doc
                .rev
                .as_deref()
                .ok_or_else(|| CouchDaoError::MissingRevision {
                    doc_id: doc.id.clone(),
                })?;
            store.delete_document(&doc.id, rev).await?;
            debug!(doc_id = %doc.id, "history entry deleted");
            Ok(Some(doc.entry))
        })
    }

    fn list_history(&self) -> BoxFuture<'static, StorageResult<Vec<HistoryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let docs = store
                .list_documents::<CouchHistoryDocument>(DocRange {
                    prefix: HISTORY_PREFIX,
                    descending: true,
                    limit: None,
                })
                .await?;
            Ok(docs.into_iter().map(|doc| doc.entry).collect())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorize(store.client.get(&url))
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

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
