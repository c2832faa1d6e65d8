use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use md5::{Digest, Md5};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use dbdb_core::collation::collate;
use dbdb_core::document::{DELETED, REV, STORE_ID};
use dbdb_core::error::{DbdbError, Result};
use dbdb_core::session::{SESSION_COOKIE_PREFIX, SessionCookie};
use dbdb_core::store::{
    BulkResult, DocumentStore, FetchRow, Transport, ViewResponse, ViewRow, WriteResult,
};
use dbdb_core::view_query::ViewQuery;

/// A map function: emits `(key, value)` pairs for a document in store shape.
pub type MapFn = dyn Fn(&Value) -> Vec<(Value, Value)> + Send + Sync;

// ---------------------------------------------------------------------------
// Internal storage types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredDoc {
    rev: String,
    deleted: bool,
    /// Body without `_id`, `_rev` and `_deleted`.
    body: Map<String, Value>,
}

impl StoredDoc {
    fn to_json(&self, id: &str) -> Value {
        let mut obj = self.body.clone();
        obj.insert(STORE_ID.into(), Value::String(id.to_string()));
        obj.insert(REV.into(), Value::String(self.rev.clone()));
        Value::Object(obj)
    }
}

struct Inner {
    name: String,
    docs: BTreeMap<String, StoredDoc>,
    views: HashMap<(String, String), Arc<MapFn>>,
}

#[derive(Default)]
struct Flags {
    offline: AtomicBool,
    view_queries: AtomicUsize,
}

/// In-memory database. Clones share the same data.
#[derive(Clone)]
pub struct MemoryAdapter {
    inner: Arc<RwLock<Inner>>,
    flags: Arc<Flags>,
    authorized: bool,
}

impl MemoryAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                name: name.to_string(),
                docs: BTreeMap::new(),
                views: HashMap::new(),
            })),
            flags: Arc::new(Flags::default()),
            authorized: true,
        }
    }

    fn with_authorization(&self, authorized: bool) -> Self {
        Self {
            authorized,
            ..self.clone()
        }
    }

    pub async fn name(&self) -> String {
        self.inner.read().await.name.clone()
    }

    /// Register a view evaluated by `query_view`.
    pub async fn define_view<F>(&self, design_doc: &str, view: &str, map: F)
    where
        F: Fn(&Value) -> Vec<(Value, Value)> + Send + Sync + 'static,
    {
        let mut inner = self.inner.write().await;
        inner
            .views
            .insert((design_doc.to_string(), view.to_string()), Arc::new(map));
    }

    /// Make every call fail as if the server were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.flags.offline.store(offline, AtomicOrdering::SeqCst);
    }

    /// Number of view queries served so far.
    pub fn view_queries(&self) -> usize {
        self.flags.view_queries.load(AtomicOrdering::SeqCst)
    }

    /// Number of live (non-deleted) documents.
    pub async fn doc_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.docs.values().filter(|d| !d.deleted).count()
    }

    fn check_access(&self) -> Result<()> {
        if self.flags.offline.load(AtomicOrdering::SeqCst) {
            return Err(DbdbError::Transport("connection refused".into()));
        }
        if !self.authorized {
            return Err(DbdbError::Unauthorized(
                "You are not authorized to access this db.".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn generate_rev(pos: u64, body: &Map<String, Value>, deleted: bool, prev: Option<&str>) -> String {
    let mut hasher = Md5::new();
    if let Some(prev) = prev {
        hasher.update(prev.as_bytes());
    }
    hasher.update(if deleted { b"1" } else { b"0" });
    let serialized = serde_json::to_string(body).unwrap_or_default();
    hasher.update(serialized.as_bytes());
    format!("{}-{:x}", pos, hasher.finalize())
}

fn rev_pos(rev: &str) -> u64 {
    rev.split_once('-')
        .and_then(|(pos, _)| pos.parse().ok())
        .unwrap_or(0)
}

fn conflict() -> DbdbError {
    DbdbError::Conflict("Document update conflict.".into())
}

/// Write one document in store shape, checking its `_rev`.
fn write_doc(docs: &mut BTreeMap<String, StoredDoc>, doc: Value) -> Result<WriteResult> {
    let Value::Object(mut body) = doc else {
        return Err(DbdbError::Store {
            error: "bad_request".into(),
            reason: "Document must be a JSON object".into(),
        });
    };

    let id = match body.remove(STORE_ID) {
        Some(Value::String(id)) => id,
        Some(_) => {
            return Err(DbdbError::Store {
                error: "bad_request".into(),
                reason: "Document id must be a string".into(),
            });
        }
        None => Uuid::new_v4().simple().to_string(),
    };
    let given_rev = body
        .remove(REV)
        .and_then(|v| v.as_str().map(String::from));
    let deleted = body
        .remove(DELETED)
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let prev = docs.get(&id);
    let prev_rev = match (prev, given_rev.as_deref()) {
        (Some(stored), Some(rev)) if stored.rev == rev => Some(stored.rev.clone()),
        (Some(stored), None) if stored.deleted => Some(stored.rev.clone()),
        (None, None) => None,
        _ => return Err(conflict()),
    };

    let pos = prev_rev.as_deref().map(rev_pos).unwrap_or(0) + 1;
    let rev = generate_rev(pos, &body, deleted, prev_rev.as_deref());
    docs.insert(
        id.clone(),
        StoredDoc {
            rev: rev.clone(),
            deleted,
            body: if deleted { Map::new() } else { body },
        },
    );

    Ok(WriteResult { id, rev })
}

/// Keep rows inside the `startkey`/`endkey` range of `query`.
fn in_range(key: &Value, query: &ViewQuery) -> bool {
    let inclusive_end = query.inclusive_end.unwrap_or(true);

    if let Some(start) = &query.start_key {
        let cmp = collate(key, start);
        if query.descending {
            if cmp == Ordering::Greater {
                return false;
            }
        } else if cmp == Ordering::Less {
            return false;
        }
    }

    if let Some(end) = &query.end_key {
        let cmp = collate(key, end);
        if query.descending {
            if cmp == Ordering::Less || (!inclusive_end && cmp == Ordering::Equal) {
                return false;
            }
        } else if cmp == Ordering::Greater || (!inclusive_end && cmp == Ordering::Equal) {
            return false;
        }
    }

    true
}

// ---------------------------------------------------------------------------
// DocumentStore implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl DocumentStore for MemoryAdapter {
    async fn get(&self, id: &str) -> Result<Value> {
        self.check_access()?;
        let inner = self.inner.read().await;
        match inner.docs.get(id) {
            Some(stored) if !stored.deleted => Ok(stored.to_json(id)),
            Some(_) => Err(DbdbError::NotFound("deleted".into())),
            None => Err(DbdbError::NotFound("missing".into())),
        }
    }

    async fn fetch_many(&self, ids: &[String]) -> Result<Vec<FetchRow>> {
        self.check_access()?;
        let inner = self.inner.read().await;
        Ok(ids
            .iter()
            .map(|id| match inner.docs.get(id) {
                Some(stored) if !stored.deleted => FetchRow {
                    key: id.clone(),
                    doc: Some(stored.to_json(id)),
                    error: None,
                },
                Some(_) => FetchRow {
                    key: id.clone(),
                    doc: None,
                    error: None,
                },
                None => FetchRow {
                    key: id.clone(),
                    doc: None,
                    error: Some("not_found".into()),
                },
            })
            .collect())
    }

    async fn insert(&self, doc: Value) -> Result<WriteResult> {
        self.check_access()?;
        let mut inner = self.inner.write().await;
        let result = write_doc(&mut inner.docs, doc)?;
        debug!(db = %inner.name, id = %result.id, rev = %result.rev, "stored document");
        Ok(result)
    }

    async fn bulk_write(&self, docs: Vec<Value>) -> Result<Vec<BulkResult>> {
        self.check_access()?;
        let mut inner = self.inner.write().await;
        Ok(docs
            .into_iter()
            .map(|doc| {
                let id = doc
                    .get(STORE_ID)
                    .and_then(|v| v.as_str())
                    .map(String::from);
                match write_doc(&mut inner.docs, doc) {
                    Ok(result) => BulkResult {
                        id: Some(result.id),
                        rev: Some(result.rev),
                        error: None,
                        reason: None,
                    },
                    Err(err) => {
                        let (error, reason) = match err {
                            DbdbError::Conflict(reason) => ("conflict".to_string(), reason),
                            DbdbError::Store { error, reason } => (error, reason),
                            other => (other.kind().to_string(), other.to_string()),
                        };
                        BulkResult {
                            id,
                            rev: None,
                            error: Some(error),
                            reason: Some(reason),
                        }
                    }
                }
            })
            .collect())
    }

    async fn query_view(
        &self,
        design_doc: &str,
        view: &str,
        query: &ViewQuery,
    ) -> Result<ViewResponse> {
        self.check_access()?;
        self.flags.view_queries.fetch_add(1, AtomicOrdering::SeqCst);

        let inner = self.inner.read().await;
        let map = inner
            .views
            .get(&(design_doc.to_string(), view.to_string()))
            .ok_or_else(|| DbdbError::NotFound("missing_named_view".into()))?;

        let mut rows: Vec<(String, Value, Value)> = Vec::new();
        for (id, stored) in inner.docs.iter().filter(|(_, d)| !d.deleted) {
            let json = stored.to_json(id);
            for (key, value) in map(&json) {
                rows.push((id.clone(), key, value));
            }
        }

        rows.sort_by(|a, b| collate(&a.1, &b.1).then_with(|| a.0.cmp(&b.0)));
        if query.descending {
            rows.reverse();
        }

        let skip = query.skip.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);

        let rows = rows
            .into_iter()
            .filter(|(_, key, _)| in_range(key, query))
            .skip(skip)
            .take(limit)
            .map(|(id, key, value)| {
                let doc = if query.include_docs {
                    inner.docs.get(&id).map(|stored| stored.to_json(&id))
                } else {
                    None
                };
                ViewRow {
                    id: Some(id),
                    key,
                    value: Some(value),
                    doc,
                }
            })
            .collect();

        Ok(ViewResponse { rows })
    }

    async fn head(&self, id: &str) -> Result<String> {
        self.check_access()?;
        let inner = self.inner.read().await;
        match inner.docs.get(id) {
            Some(stored) if !stored.deleted => Ok(stored.rev.clone()),
            _ => Err(DbdbError::NotFound("missing".into())),
        }
    }

    async fn destroy(&self, id: &str, rev: &str) -> Result<String> {
        self.check_access()?;
        let mut inner = self.inner.write().await;
        match inner.docs.get(id) {
            Some(stored) if !stored.deleted => {}
            _ => return Err(DbdbError::NotFound("missing".into())),
        }
        let mut tombstone = Map::new();
        tombstone.insert(STORE_ID.into(), Value::String(id.to_string()));
        tombstone.insert(REV.into(), Value::String(rev.to_string()));
        tombstone.insert(DELETED.into(), Value::Bool(true));
        let result = write_doc(&mut inner.docs, Value::Object(tombstone))?;
        Ok(result.rev)
    }
}

// ---------------------------------------------------------------------------
// MemoryServer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ServerState {
    databases: HashMap<String, MemoryAdapter>,
    sessions: HashSet<String>,
}

/// A set of in-memory databases behind an optional key/password pair.
#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
    credentials: Option<(String, String)>,
    auth_calls: Arc<AtomicUsize>,
    auth_delay: Option<Duration>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key`/`password` for every database.
    pub fn with_credentials(mut self, key: &str, password: &str) -> Self {
        self.credentials = Some((key.to_string(), password.to_string()));
        self
    }

    /// Hold every authentication round-trip for `delay`.
    pub fn with_auth_delay(mut self, delay: Duration) -> Self {
        self.auth_delay = Some(delay);
        self
    }

    /// Number of authentication round-trips served so far.
    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(AtomicOrdering::SeqCst)
    }

    /// Direct, always-authorized handle on `db`, created on first use.
    pub fn database(&self, db: &str) -> MemoryAdapter {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .databases
            .entry(db.to_string())
            .or_insert_with(|| MemoryAdapter::new(db))
            .clone()
    }

    fn session_valid(&self, session: Option<&SessionCookie>) -> bool {
        if self.credentials.is_none() {
            return true;
        }
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        session.is_some_and(|c| c.name == SESSION_COOKIE_PREFIX && state.sessions.contains(&c.value))
    }
}

#[async_trait]
impl Transport for MemoryServer {
    async fn authenticate(&self, key: &str, password: &str) -> Result<SessionCookie> {
        self.auth_calls.fetch_add(1, AtomicOrdering::SeqCst);
        if let Some(delay) = self.auth_delay {
            tokio::time::sleep(delay).await;
        }

        match &self.credentials {
            Some((k, p)) if k == key && p == password => {}
            Some(_) => {
                return Err(DbdbError::Unauthorized(
                    "Name or password is incorrect.".into(),
                ));
            }
            None => {}
        }

        let token = Uuid::new_v4().simple().to_string();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sessions.insert(token.clone());
        Ok(SessionCookie::new(SESSION_COOKIE_PREFIX, token))
    }

    fn open(&self, db: &str, session: Option<SessionCookie>) -> Arc<dyn DocumentStore> {
        let authorized = self.session_valid(session.as_ref());
        Arc::new(self.database(db).with_authorization(authorized))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use dbdb_core::view_query::{ViewOptions, ViewPlan};
    use serde_json::json;

    fn plan(opts: ViewOptions) -> ViewQuery {
        match ViewQuery::build(&opts) {
            ViewPlan::Query(q) => q,
            ViewPlan::Empty(reason) => panic!("empty plan: {}", reason),
        }
    }

    async fn entries_db() -> MemoryAdapter {
        let db = MemoryAdapter::new("feednstatus");
        db.define_view("fns", "entries_by_source", |doc| {
            if doc["type"] == "entry" {
                vec![(json!([doc["source"], doc["createdAt"]]), Value::Null)]
            } else {
                vec![]
            }
        })
        .await;
        for (id, source, created) in [
            ("ent1", "src2", "2015-05-23"),
            ("ent2", "src2", "2015-05-24"),
            ("ent3", "src1", "2015-05-22"),
            ("ent4", "src3", "2015-05-25"),
        ] {
            db.insert(json!({"_id": id, "type": "entry", "source": source, "createdAt": created}))
                .await
                .unwrap();
        }
        db
    }

    fn ids(response: &ViewResponse) -> Vec<&str> {
        response
            .rows
            .iter()
            .map(|r| r.id.as_deref().unwrap_or_default())
            .collect()
    }

    #[tokio::test]
    async fn insert_and_get() {
        let db = MemoryAdapter::new("test");
        let result = db.insert(json!({"_id": "doc1", "title": "T"})).await.unwrap();
        assert_eq!(result.id, "doc1");
        assert!(result.rev.starts_with("1-"));

        let doc = db.get("doc1").await.unwrap();
        assert_eq!(doc["_id"], "doc1");
        assert_eq!(doc["_rev"], json!(result.rev));
        assert_eq!(doc["title"], "T");
    }

    #[tokio::test]
    async fn insert_assigns_id() {
        let db = MemoryAdapter::new("test");
        let result = db.insert(json!({"type": "entry"})).await.unwrap();
        assert_eq!(result.id.len(), 32);
        assert_eq!(db.doc_count().await, 1);
    }

    #[tokio::test]
    async fn update_requires_current_rev() {
        let db = MemoryAdapter::new("test");
        let first = db.insert(json!({"_id": "doc1", "v": 1})).await.unwrap();

        let err = db.insert(json!({"_id": "doc1", "v": 2})).await.unwrap_err();
        assert!(matches!(err, DbdbError::Conflict(_)));

        let second = db
            .insert(json!({"_id": "doc1", "_rev": first.rev, "v": 2}))
            .await
            .unwrap();
        assert!(second.rev.starts_with("2-"));

        let err = db
            .insert(json!({"_id": "doc1", "_rev": first.rev, "v": 3}))
            .await
            .unwrap_err();
        assert!(matches!(err, DbdbError::Conflict(_)));
    }

    #[tokio::test]
    async fn destroy_and_recreate() {
        let db = MemoryAdapter::new("test");
        let first = db.insert(json!({"_id": "doc1"})).await.unwrap();

        assert!(matches!(
            db.destroy("doc1", "1-stale").await.unwrap_err(),
            DbdbError::Conflict(_)
        ));
        let tombstone = db.destroy("doc1", &first.rev).await.unwrap();
        assert!(tombstone.starts_with("2-"));

        assert!(matches!(db.get("doc1").await.unwrap_err(), DbdbError::NotFound(_)));
        assert!(matches!(db.head("doc1").await.unwrap_err(), DbdbError::NotFound(_)));

        let again = db.insert(json!({"_id": "doc1"})).await.unwrap();
        assert!(again.rev.starts_with("3-"));
    }

    #[tokio::test]
    async fn fetch_many_keeps_order() {
        let db = MemoryAdapter::new("test");
        db.insert(json!({"_id": "a"})).await.unwrap();
        db.insert(json!({"_id": "b"})).await.unwrap();

        let rows = db
            .fetch_many(&["b".to_string(), "zz".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(rows[0].doc.as_ref().unwrap()["_id"], "b");
        assert_eq!(rows[1].doc, None);
        assert_eq!(rows[1].error.as_deref(), Some("not_found"));
        assert_eq!(rows[2].doc.as_ref().unwrap()["_id"], "a");
    }

    #[tokio::test]
    async fn bulk_write_isolates_failures() {
        let db = MemoryAdapter::new("test");
        db.insert(json!({"_id": "taken"})).await.unwrap();

        let results = db
            .bulk_write(vec![json!({"_id": "fresh"}), json!({"_id": "taken"})])
            .await
            .unwrap();
        assert!(results[0].error.is_none());
        assert!(results[0].rev.is_some());
        assert_eq!(results[1].id.as_deref(), Some("taken"));
        assert_eq!(results[1].error.as_deref(), Some("conflict"));
    }

    #[tokio::test]
    async fn view_prefix_scan() {
        let db = entries_db().await;
        let asc = db
            .query_view(
                "fns",
                "entries_by_source",
                &plan(ViewOptions {
                    filter: Some(json!(["src2"])),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        assert_eq!(ids(&asc), vec!["ent1", "ent2"]);
        assert!(asc.rows[0].doc.is_some());

        let desc = db
            .query_view(
                "fns",
                "entries_by_source",
                &plan(ViewOptions {
                    filter: Some(json!(["src2"])),
                    descending: true,
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        assert_eq!(ids(&desc), vec!["ent2", "ent1"]);
        assert_eq!(db.view_queries(), 2);
    }

    #[tokio::test]
    async fn view_skip_and_limit() {
        let db = entries_db().await;
        let page = db
            .query_view(
                "fns",
                "entries_by_source",
                &plan(ViewOptions {
                    max: Some(2),
                    first: Some(1),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["ent1", "ent2"]);
    }

    #[tokio::test]
    async fn unknown_view_is_not_found() {
        let db = MemoryAdapter::new("test");
        let err = db
            .query_view("fns", "nope", &plan(ViewOptions::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, DbdbError::NotFound(_)));
    }

    #[tokio::test]
    async fn offline_fails_everything() {
        let db = MemoryAdapter::new("test");
        db.set_offline(true);
        assert_eq!(db.get("x").await.unwrap_err().kind(), "transport");
        db.set_offline(false);
        assert_eq!(db.get("x").await.unwrap_err().kind(), "not_found");
    }

    #[tokio::test]
    async fn server_checks_sessions() {
        let server = MemoryServer::new().with_credentials("thekey", "thepassword");
        server.database("feednstatus").insert(json!({"_id": "doc1"})).await.unwrap();

        let anonymous = server.open("feednstatus", None);
        assert_eq!(anonymous.get("doc1").await.unwrap_err().kind(), "unauthorized");

        assert!(server.authenticate("thekey", "wrong").await.is_err());
        let cookie = server.authenticate("thekey", "thepassword").await.unwrap();
        assert_eq!(cookie.name, "AuthSession");
        let store = server.open("feednstatus", Some(cookie));
        assert_eq!(store.get("doc1").await.unwrap()["_id"], "doc1");
        assert_eq!(server.auth_calls(), 2);
    }
}
