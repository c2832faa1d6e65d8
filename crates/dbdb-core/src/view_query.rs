//! Range-scan construction for CouchDB map/reduce views.
//!
//! A logical query (filter key, pagination cursor, sort direction) is turned
//! into the `startkey`/`endkey`/`skip`/`limit`/`descending`/`inclusive_end`
//! parameters of `GET /{db}/_design/{ddoc}/_view/{view}`. The same options
//! always produce the same parameters, in the same order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DbdbError, Result};

// ---------------------------------------------------------------------------
// ViewId
// ---------------------------------------------------------------------------

/// A view addressed as `"<designDoc>:<viewName>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewId {
    pub design_doc: String,
    pub view: String,
}

impl FromStr for ViewId {
    type Err = DbdbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((ddoc, view)) if !ddoc.is_empty() && !view.is_empty() && !view.contains(':') => {
                Ok(ViewId {
                    design_doc: ddoc.to_string(),
                    view: view.to_string(),
                })
            }
            _ => Err(DbdbError::Validation(format!(
                "view id must be <designDoc>:<viewName>, got {:?}",
                s
            ))),
        }
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.design_doc, self.view)
    }
}

// ---------------------------------------------------------------------------
// ViewOptions
// ---------------------------------------------------------------------------

/// Logical parameters of a view query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewOptions {
    /// Scalar, array (hierarchical prefix) or object key to match.
    pub filter: Option<Value>,
    /// Numeric offset; ignored when `first_key` is set.
    pub first: Option<u64>,
    /// Cursor narrowing the side the scan starts from.
    pub first_key: Option<Value>,
    /// Cursor narrowing the side the scan ends at.
    pub last_key: Option<Value>,
    /// Maximum number of rows.
    pub max: Option<u64>,
    pub descending: bool,
}

// ---------------------------------------------------------------------------
// ViewQuery
// ---------------------------------------------------------------------------

/// Native range-scan parameters for one view request.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewQuery {
    pub start_key: Option<Value>,
    pub end_key: Option<Value>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub descending: bool,
    /// Set only for filtered scans.
    pub inclusive_end: Option<bool>,
    pub include_docs: bool,
}

/// Outcome of planning a view query.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewPlan {
    Query(ViewQuery),
    /// The options can never match a row; carries the reason.
    Empty(String),
}

impl ViewQuery {
    /// Plan the range scan for `opts`. `opts` is only read.
    ///
    /// An array filter becomes a prefix scan: both bounds start as copies of
    /// the filter and the open side gets the `{}` sentinel, which sorts after
    /// every other key. Ascending scans leave the sentinel on `endkey` unless
    /// `last_key` narrows it; descending scans put it on `startkey` unless
    /// `first_key` narrows it. Scalar and object filters match exactly, and
    /// cannot take a `first_key` since there is no sequence to extend.
    pub fn build(opts: &ViewOptions) -> ViewPlan {
        let mut query = ViewQuery {
            start_key: None,
            end_key: None,
            skip: None,
            limit: opts.max,
            descending: opts.descending,
            inclusive_end: None,
            include_docs: true,
        };

        match &opts.filter {
            Some(Value::Array(prefix)) => {
                let mut start = prefix.clone();
                let mut end = prefix.clone();

                if let Some(first_key) = &opts.first_key {
                    extend_key(&mut start, first_key);
                }
                if let Some(last_key) = &opts.last_key {
                    extend_key(&mut end, last_key);
                }

                if opts.descending {
                    if opts.first_key.is_none() {
                        start.push(sentinel());
                    }
                } else if opts.last_key.is_none() {
                    end.push(sentinel());
                }

                query.start_key = Some(Value::Array(start));
                query.end_key = Some(Value::Array(end));
                query.inclusive_end = Some(true);
            }
            Some(exact) => {
                if opts.first_key.is_some() {
                    return ViewPlan::Empty(format!(
                        "first_key cannot extend non-array filter {}",
                        exact
                    ));
                }
                query.start_key = Some(exact.clone());
                query.end_key = Some(opts.last_key.clone().unwrap_or_else(|| exact.clone()));
                query.inclusive_end = Some(true);
            }
            None => {
                query.start_key = opts.first_key.clone();
                query.end_key = opts.last_key.clone();
            }
        }

        if opts.first_key.is_none() {
            query.skip = opts.first;
        }

        ViewPlan::Query(query)
    }

    /// Query-string parameters, with keys JSON-encoded.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("include_docs", self.include_docs.to_string()),
            ("descending", self.descending.to_string()),
        ];
        if let Some(inclusive_end) = self.inclusive_end {
            params.push(("inclusive_end", inclusive_end.to_string()));
        }
        if let Some(start) = &self.start_key {
            params.push(("startkey", start.to_string()));
        }
        if let Some(end) = &self.end_key {
            params.push(("endkey", end.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(skip) = self.skip {
            params.push(("skip", skip.to_string()));
        }
        params
    }
}

fn sentinel() -> Value {
    Value::Object(Map::new())
}

fn extend_key(key: &mut Vec<Value>, cursor: &Value) {
    match cursor {
        Value::Array(parts) => key.extend(parts.iter().cloned()),
        single => key.push(single.clone()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
