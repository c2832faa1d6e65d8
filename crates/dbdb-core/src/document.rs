use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DbdbError, Result};

// ---------------------------------------------------------------------------
// Reserved field names
// ---------------------------------------------------------------------------

/// Public identifier field.
pub const ID: &str = "id";
/// Store-native identifier field.
pub const STORE_ID: &str = "_id";
pub const REV: &str = "_rev";
pub const DELETED: &str = "_deleted";
/// Sort key of a view row, attached to documents returned by view queries.
pub const KEY: &str = "_key";
pub const ERROR: &str = "_error";
pub const REASON: &str = "_reason";
/// Creation timestamp, never overwritten by an update.
pub const CREATED_AT: &str = "createdAt";

/// Whether a field name belongs to the store's reserved namespace.
pub fn is_reserved(field: &str) -> bool {
    field.starts_with('_')
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A document in its public shape.
///
/// The identifier lives in `id` on this side of the adapter. The store sees
/// it as `_id`; [`Document::to_store`] and [`Document::from_store`] do the
/// renaming. Bookkeeping fields are lifted out of the JSON body into typed
/// fields; everything else, including unknown underscore fields, stays in
/// `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Document {
    pub id: Option<String>,
    pub rev: Option<String>,
    pub deleted: bool,
    /// View sort key, set only on documents returned by `get_view`.
    pub key: Option<Value>,
    /// Per-item failure code from a bulk write.
    pub error: Option<String>,
    /// Per-item failure reason from a bulk write.
    pub reason: Option<String>,
    pub data: Map<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Builder-style field setter.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(name.into(), value.into());
    }

    /// Parse a document in public shape (`id`, `_rev`, `_deleted`, ...).
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(DbdbError::Validation("Missing document object".into()));
        };

        Ok(Document {
            id: take_string(&mut obj, ID)?,
            rev: take_string(&mut obj, REV)?,
            deleted: take_bool(&mut obj, DELETED),
            key: obj.remove(KEY),
            error: take_string(&mut obj, ERROR)?,
            reason: take_string(&mut obj, REASON)?,
            data: obj,
        })
    }

    /// Render the document in public shape.
    pub fn to_json(&self) -> Value {
        let mut obj = self.data.clone();

        if let Some(id) = &self.id {
            obj.insert(ID.into(), Value::String(id.clone()));
        }
        if let Some(rev) = &self.rev {
            obj.insert(REV.into(), Value::String(rev.clone()));
        }
        if self.deleted {
            obj.insert(DELETED.into(), Value::Bool(true));
        }
        if let Some(key) = &self.key {
            obj.insert(KEY.into(), key.clone());
        }
        if let Some(error) = &self.error {
            obj.insert(ERROR.into(), Value::String(error.clone()));
        }
        if let Some(reason) = &self.reason {
            obj.insert(REASON.into(), Value::String(reason.clone()));
        }

        Value::Object(obj)
    }

    /// Parse a document as the store returns it (`_id` shape).
    ///
    /// A missing `_id` leaves `id` unset.
    pub fn from_store(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(DbdbError::Transport(
                "store returned a document that is not a JSON object".into(),
            ));
        };

        Ok(Document {
            id: take_string(&mut obj, STORE_ID)?,
            rev: take_string(&mut obj, REV)?,
            deleted: take_bool(&mut obj, DELETED),
            key: None,
            error: None,
            reason: None,
            data: obj,
        })
    }

    /// Render the wire payload for a write.
    ///
    /// `_id` is only emitted when the document has an id, so the store can
    /// assign one on insert. View keys and bulk error fields never go over
    /// the wire.
    pub fn to_store(&self) -> Value {
        let mut obj = self.data.clone();

        if let Some(id) = &self.id {
            obj.insert(STORE_ID.into(), Value::String(id.clone()));
        }
        if let Some(rev) = &self.rev {
            obj.insert(REV.into(), Value::String(rev.clone()));
        }
        if self.deleted {
            obj.insert(DELETED.into(), Value::Bool(true));
        }

        Value::Object(obj)
    }

    /// Copy every non-reserved field of `changes` onto this document,
    /// keeping the stored `createdAt`.
    pub fn overlay(&mut self, changes: &Document) {
        for (name, value) in &changes.data {
            if is_reserved(name) || name == CREATED_AT {
                continue;
            }
            self.data.insert(name.clone(), value.clone());
        }
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.to_json()
    }
}

impl TryFrom<Value> for Document {
    type Error = DbdbError;

    fn try_from(value: Value) -> Result<Self> {
        Document::from_json(value)
    }
}

fn take_string(obj: &mut Map<String, Value>, field: &str) -> Result<Option<String>> {
    match obj.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(DbdbError::Validation(format!(
            "field {} must be a string, got {}",
            field, other
        ))),
    }
}

fn take_bool(obj: &mut Map<String, Value>, field: &str) -> bool {
    obj.remove(field).and_then(|v| v.as_bool()).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn to_store_renames_id() {
        let doc = Document::from_json(json!({"id": "doc1", "type": "entry"})).unwrap();
        assert_eq!(doc.to_store(), json!({"_id": "doc1", "type": "entry"}));
    }

    #[test]
    fn to_store_without_id_leaves_id_to_the_store() {
        let doc = Document::new().field("type", "entry");
        let wire = doc.to_store();
        assert!(wire.get("_id").is_none());
        assert!(wire.get("id").is_none());
    }

    #[test]
    fn from_store_renames_id() {
        let doc = Document::from_store(json!({
            "_id": "doc1",
            "_rev": "2774761001",
            "title": "The title"
        }))
        .unwrap();
        assert_eq!(doc.id.as_deref(), Some("doc1"));
        assert_eq!(doc.rev.as_deref(), Some("2774761001"));
        assert_eq!(
            doc.to_json(),
            json!({"id": "doc1", "_rev": "2774761001", "title": "The title"})
        );
    }

    #[test]
    fn from_store_without_id_is_a_no_op() {
        let doc = Document::from_store(json!({"title": "x"})).unwrap();
        assert_eq!(doc.id, None);
        assert_eq!(doc.to_json(), json!({"title": "x"}));
    }

    #[test]
    fn public_store_round_trip() {
        let docs = vec![
            json!({"id": "a", "n": 1, "nested": {"id": "inner"}}),
            json!({"id": "b", "_rev": "1-abc", "tags": ["x", "y"]}),
            json!({"id": "c", "_deleted": true}),
            json!({"type": "entry"}),
        ];
        for original in docs {
            let doc = Document::from_json(original.clone()).unwrap();
            let back = Document::from_store(doc.to_store()).unwrap();
            assert_eq!(back.to_json(), original);
        }
    }

    #[test]
    fn bookkeeping_fields_stay_off_the_wire() {
        let doc = Document::from_json(json!({
            "id": "doc2",
            "_key": ["src2", 1],
            "_error": "conflict",
            "_reason": "Some reason"
        }))
        .unwrap();
        assert_eq!(doc.key, Some(json!(["src2", 1])));
        assert_eq!(doc.to_store(), json!({"_id": "doc2"}));
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(
            Document::from_json(Value::Null),
            Err(DbdbError::Validation(_))
        ));
        assert!(Document::from_json(json!({"id": 12})).is_err());
    }

    #[test]
    fn overlay_skips_reserved_and_created_at() {
        let mut stored = Document::from_json(json!({
            "id": "doc1",
            "_rev": "1-a",
            "type": "entry",
            "createdAt": "2015-05-23"
        }))
        .unwrap();
        let changes = Document::from_json(json!({
            "id": "doc1",
            "_rev": "9-z",
            "_internal": "something",
            "title": "T",
            "createdAt": "2015-06-01"
        }))
        .unwrap();

        stored.overlay(&changes);

        assert_eq!(
            stored.to_json(),
            json!({
                "id": "doc1",
                "_rev": "1-a",
                "type": "entry",
                "title": "T",
                "createdAt": "2015-05-23"
            })
        );
    }

    #[test]
    fn serde_uses_public_shape() {
        let doc: Document = serde_json::from_value(json!({"id": "d", "x": 1})).unwrap();
        assert_eq!(doc.id.as_deref(), Some("d"));
        assert_eq!(serde_json::to_value(&doc).unwrap(), json!({"id": "d", "x": 1}));
    }
}
