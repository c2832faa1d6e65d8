/// HTTP transport for dbdb.
///
/// Maps each [`DocumentStore`] capability onto the corresponding CouchDB
/// REST endpoint of one database, and classifies error replies into
/// [`DbdbError`].
use async_trait::async_trait;
use reqwest::header::{COOKIE, ETAG};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use dbdb_core::error::{DbdbError, Result};
use dbdb_core::session::SessionCookie;
use dbdb_core::store::{BulkResult, DocumentStore, FetchRow, ViewResponse, WriteResult};
use dbdb_core::view_query::ViewQuery;

mod auth;

pub use auth::HttpTransport;

// ---------------------------------------------------------------------------
// CouchDB JSON request/response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct CouchDbError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct CouchDbPutResponse {
    id: String,
    rev: String,
}

#[derive(Debug, Serialize)]
struct CouchDbKeysRequest<'a> {
    keys: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CouchDbAllDocsResponse {
    #[serde(default)]
    rows: Vec<FetchRow>,
}

#[derive(Debug, Serialize)]
struct CouchDbBulkDocsRequest {
    docs: Vec<Value>,
}

// ---------------------------------------------------------------------------
// HttpAdapter
// ---------------------------------------------------------------------------

/// Handle on one remote database.
pub struct HttpAdapter {
    client: Client,
    base_url: String,
    session: Option<SessionCookie>,
}

impl HttpAdapter {
    /// Create an adapter for a database URL such as
    /// `http://localhost:5984/mydb`.
    pub fn new(url: &str) -> Self {
        Self::with_client(url, Client::new())
    }

    pub fn with_client(url: &str, client: Client) -> Self {
        Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            session: None,
        }
    }

    /// Send `session` as the `Cookie` header of every request.
    pub fn with_session(mut self, session: Option<SessionCookie>) -> Self {
        self.session = session;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.session {
            Some(cookie) => builder.header(COOKIE, cookie.to_string()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(transport)?;
        debug!(url = %response.url(), status = %response.status(), "store round-trip");
        check_error(response).await
    }
}

pub(crate) fn transport(e: reqwest::Error) -> DbdbError {
    DbdbError::Transport(e.to_string())
}

/// Pass successful responses through, classify the rest.
pub(crate) async fn check_error(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: CouchDbError = response.json().await.unwrap_or_default();
    let reason = if body.reason.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body.reason
    };
    Err(DbdbError::from_store(status.as_u16(), &body.error, &reason))
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    response.json().await.map_err(transport)
}

#[async_trait]
impl DocumentStore for HttpAdapter {
    async fn get(&self, id: &str) -> Result<Value> {
        let url = self.url(&urlencoded(id));
        let resp = self.send(self.request(Method::GET, &url)).await?;
        decode(resp).await
    }

    async fn fetch_many(&self, ids: &[String]) -> Result<Vec<FetchRow>> {
        let url = self.url("_all_docs");
        let builder = self
            .request(Method::POST, &url)
            .query(&[("include_docs", "true")])
            .json(&CouchDbKeysRequest { keys: ids });
        let resp = self.send(builder).await?;
        let result: CouchDbAllDocsResponse = decode(resp).await?;
        Ok(result.rows)
    }

    async fn insert(&self, doc: Value) -> Result<WriteResult> {
        let builder = self.request(Method::POST, &self.base_url).json(&doc);
        let resp = self.send(builder).await?;
        let result: CouchDbPutResponse = decode(resp).await?;
        Ok(WriteResult {
            id: result.id,
            rev: result.rev,
        })
    }

    async fn bulk_write(&self, docs: Vec<Value>) -> Result<Vec<BulkResult>> {
        let builder = self
            .request(Method::POST, &self.url("_bulk_docs"))
            .json(&CouchDbBulkDocsRequest { docs });
        let resp = self.send(builder).await?;
        decode(resp).await
    }

    async fn query_view(
        &self,
        design_doc: &str,
        view: &str,
        query: &ViewQuery,
    ) -> Result<ViewResponse> {
        let url = self.url(&format!(
            "_design/{}/_view/{}",
            urlencoded(design_doc),
            urlencoded(view)
        ));
        let builder = self.request(Method::GET, &url).query(&query.to_params());
        let resp = self.send(builder).await?;
        decode(resp).await
    }

    async fn head(&self, id: &str) -> Result<String> {
        let url = self.url(&urlencoded(id));
        let resp = self.send(self.request(Method::HEAD, &url)).await?;
        resp.headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|etag| etag.trim_matches('"').to_string())
            .ok_or_else(|| DbdbError::Transport(format!("no ETag in HEAD reply for {}", id)))
    }

    async fn destroy(&self, id: &str, rev: &str) -> Result<String> {
        let url = self.url(&urlencoded(id));
        let builder = self.request(Method::DELETE, &url).query(&[("rev", rev)]);
        let resp = self.send(builder).await?;
        let result: CouchDbPutResponse = decode(resp).await?;
        Ok(result.rev)
    }
}

/// Percent-encoding for document ids and database names in URL paths.
pub(crate) fn urlencoded(s: &str) -> String {
    s.replace('%', "%25")
        .replace(' ', "%20")
        .replace('/', "%2F")
        .replace('?', "%3F")
        .replace('#', "%23")
        .replace('+', "%2B")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_reserved_characters() {
        assert_eq!(urlencoded("a b/c?d#e+f%"), "a%20b%2Fc%3Fd%23e%2Bf%25");
        assert_eq!(urlencoded("plain"), "plain");
    }

    #[test]
    fn joins_paths() {
        let adapter = HttpAdapter::new("http://localhost:5984/feednstatus/");
        assert_eq!(adapter.base_url(), "http://localhost:5984/feednstatus");
        assert_eq!(
            adapter.url("/_bulk_docs"),
            "http://localhost:5984/feednstatus/_bulk_docs"
        );
    }
}
