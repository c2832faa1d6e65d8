//! # dbdb
//!
//! Document-database access for CouchDB and Cloudant.
//!
//! A [`Dbdb`] wraps one database: plain CRUD, bulk writes and range scans
//! over map/reduce views, with documents in their public `id` shape. The
//! connection, including the optional cookie login, is made on first use
//! and shared by every call.
//!
//! ```no_run
//! use dbdb::{Config, Dbdb, Document, ViewOptions};
//!
//! # async fn example() -> dbdb::Result<()> {
//! let db = Dbdb::new(
//!     Config::new("http://localhost:5984", "feednstatus").with_credentials("key", "secret"),
//! );
//!
//! let doc = db.insert(Document::with_id("doc1").field("type", "entry")).await?;
//! let doc = db.get(doc.id.as_deref().unwrap_or_default()).await?;
//!
//! let entries = db
//!     .get_view(
//!         "fns:entries_by_source",
//!         &ViewOptions {
//!             filter: Some(serde_json::json!(["src2"])),
//!             descending: true,
//!             ..Default::default()
//!         },
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

pub use config::Config;
pub use connection::ConnectionManager;

pub use dbdb_core::document::Document;
pub use dbdb_core::error::{DbdbError, Result};
pub use dbdb_core::session::SessionCookie;
pub use dbdb_core::store::{DocumentStore, Transport};
pub use dbdb_core::view_query::{ViewId, ViewOptions, ViewPlan, ViewQuery};

pub use dbdb_adapter_http::{HttpAdapter, HttpTransport};

/// Handle on one database.
pub struct Dbdb {
    config: Config,
    connection: ConnectionManager,
}

impl Dbdb {
    /// Talk to the CouchDB server at `config.url` over HTTP.
    pub fn new(config: Config) -> Self {
        let transport = Arc::new(HttpTransport::new(&config.url));
        Self::with_transport(config, transport)
    }

    /// Use any transport, e.g. an in-memory server in tests.
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            connection: ConnectionManager::new(transport, config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // -----------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------

    pub async fn connect(&self) -> Result<Arc<dyn DocumentStore>> {
        self.connection.connect().await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await
    }

    // -----------------------------------------------------------------
    // Document operations
    // -----------------------------------------------------------------

    /// Fetch one document.
    pub async fn get(&self, id: &str) -> Result<Document> {
        if id.is_empty() {
            return Err(DbdbError::Validation("Missing document id".into()));
        }
        let store = self.connect().await?;
        Document::from_store(store.get(id).await?)
    }

    /// Fetch several documents in one round-trip.
    ///
    /// The result lines up with `ids`; unknown or deleted ids give `None`.
    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<Option<Document>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let store = self.connect().await?;
        let rows = store.fetch_many(ids).await?;

        let mut found = HashMap::with_capacity(rows.len());
        for row in rows {
            if let Some(doc) = row.doc.filter(|d| !d.is_null()) {
                found.insert(row.key, Document::from_store(doc)?);
            }
        }
        Ok(ids.iter().map(|id| found.get(id).cloned()).collect())
    }

    /// Write a new document, returning it with its id and revision.
    pub async fn insert(&self, mut doc: Document) -> Result<Document> {
        let store = self.connect().await?;
        let result = store.insert(doc.to_store()).await?;
        debug!(id = %result.id, rev = %result.rev, "inserted");
        doc.id = Some(result.id);
        doc.rev = Some(result.rev);
        Ok(doc)
    }

    /// Merge `changes` into the stored document.
    ///
    /// Fields not present in `changes` are kept, reserved fields are
    /// ignored and `createdAt` keeps its stored value.
    pub async fn update(&self, changes: Document) -> Result<Document> {
        let id = match changes.id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => return Err(DbdbError::Validation("Missing id".into())),
        };
        let store = self.connect().await?;

        let mut doc = Document::from_store(store.get(id).await?)?;
        doc.overlay(&changes);

        let result = store.insert(doc.to_store()).await?;
        debug!(id = %result.id, rev = %result.rev, "updated");
        doc.id = Some(result.id);
        doc.rev = Some(result.rev);
        Ok(doc)
    }

    /// Delete the current revision of a document.
    pub async fn delete(&self, id: &str) -> Result<Document> {
        if id.is_empty() {
            return Err(DbdbError::Validation("Missing document id".into()));
        }
        let store = self.connect().await?;
        let rev = store.head(id).await?;
        let rev = store.destroy(id, &rev).await?;
        debug!(id, rev = %rev, "deleted");

        Ok(Document {
            id: Some(id.to_string()),
            rev: Some(rev),
            deleted: true,
            ..Document::default()
        })
    }

    /// Write several documents in one round-trip.
    ///
    /// Item failures land in each document's `error`/`reason`; only a
    /// failure of the whole request is returned as an error.
    pub async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let store = self.connect().await?;
        let payload = docs.iter().map(Document::to_store).collect();
        let results = store
            .bulk_write(payload)
            .await
            .map_err(|e| DbdbError::Bulk(Box::new(e)))?;
        debug!(count = results.len(), "bulk write");

        let mut results = results.into_iter();
        Ok(docs
            .into_iter()
            .map(|mut doc| {
                if let Some(result) = results.next() {
                    if result.id.is_some() {
                        doc.id = result.id;
                    }
                    if result.rev.is_some() {
                        doc.rev = result.rev;
                    }
                    doc.error = result.error;
                    doc.reason = result.reason;
                }
                doc
            })
            .collect())
    }

    /// Delete several documents at the revisions they carry.
    pub async fn delete_many(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        let docs = docs
            .into_iter()
            .map(|mut doc| {
                doc.deleted = true;
                doc
            })
            .collect();
        self.insert_many(docs).await
    }

    // -----------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------

    /// Range scan over the view `"<designDoc>:<viewName>"`.
    ///
    /// Every returned document carries its view row key in `key`. Rows
    /// with neither a document nor an object value are skipped.
    pub async fn get_view(&self, view_id: &str, options: &ViewOptions) -> Result<Vec<Document>> {
        let id: ViewId = view_id.parse()?;
        let query = match ViewQuery::build(options) {
            ViewPlan::Query(query) => query,
            ViewPlan::Empty(reason) => {
                warn!(view = %id, %reason, "view query matches nothing");
                return Ok(Vec::new());
            }
        };

        let store = self.connect().await?;
        let response = store.query_view(&id.design_doc, &id.view, &query).await?;
        debug!(view = %id, rows = response.rows.len(), "view query");

        response
            .rows
            .into_iter()
            .filter_map(|row| {
                let payload = row
                    .doc
                    .filter(|d| !d.is_null())
                    .or_else(|| row.value.filter(Value::is_object))?;
                Some(Document::from_store(payload).map(|mut doc| {
                    doc.key = Some(row.key);
                    doc
                }))
            })
            .collect()
    }
}
