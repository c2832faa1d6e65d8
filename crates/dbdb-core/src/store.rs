use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::session::SessionCookie;
use crate::view_query::ViewQuery;

/// One row of a multi-id fetch, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRow {
    /// The requested id.
    pub key: String,
    #[serde(default)]
    pub doc: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Reply to a single-document write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub id: String,
    pub rev: String,
}

/// Per-item reply to a bulk write.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BulkResult {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A row returned by a view query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewResponse {
    #[serde(default)]
    pub rows: Vec<ViewRow>,
}

/// Capabilities of one remote database, speaking the store's wire shape
/// (`_id`, `_rev`, `_deleted`).
///
/// Errors are already classified into [`crate::error::DbdbError`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document.
    async fn get(&self, id: &str) -> Result<Value>;

    /// Fetch several documents. Unknown ids come back as rows without `doc`.
    async fn fetch_many(&self, ids: &[String]) -> Result<Vec<FetchRow>>;

    /// Write one document, creating or updating it.
    async fn insert(&self, doc: Value) -> Result<WriteResult>;

    /// Write several documents. Item failures are reported per row.
    async fn bulk_write(&self, docs: Vec<Value>) -> Result<Vec<BulkResult>>;

    /// Run a range scan over a map/reduce view.
    async fn query_view(&self, design_doc: &str, view: &str, query: &ViewQuery)
    -> Result<ViewResponse>;

    /// Current revision of a document, without its body.
    async fn head(&self, id: &str) -> Result<String>;

    /// Delete a document at the given revision, returning the tombstone rev.
    async fn destroy(&self, id: &str, rev: &str) -> Result<String>;
}

/// Entry point to a document server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Exchange credentials for a session cookie.
    async fn authenticate(&self, key: &str, password: &str) -> Result<SessionCookie>;

    /// Open a handle on `db`, sending `session` with every request.
    fn open(&self, db: &str, session: Option<SessionCookie>) -> Arc<dyn DocumentStore>;
}
