use thiserror::Error;

/// Errors surfaced by dbdb operations.
///
/// Store replies are classified into this taxonomy by
/// [`DbdbError::from_store`]; argument problems are reported as
/// [`DbdbError::Validation`] before any request is made.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DbdbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("document update conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store error ({error}): {reason}")]
    Store { error: String, reason: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("could not write documents: {0}")]
    Bulk(Box<DbdbError>),
}

impl DbdbError {
    /// Classify an error reply from the document store.
    ///
    /// The `error` code wins over the HTTP status: a 409 carrying anything
    /// other than `conflict` stays a generic store error.
    pub fn from_store(status: u16, error: &str, reason: &str) -> Self {
        match (status, error) {
            (_, "not_found") | (404, _) => DbdbError::NotFound(reason.to_string()),
            (_, "conflict") => DbdbError::Conflict(reason.to_string()),
            (401 | 403, _) | (_, "unauthorized") | (_, "forbidden") => {
                DbdbError::Unauthorized(reason.to_string())
            }
            _ => DbdbError::Store {
                error: error.to_string(),
                reason: reason.to_string(),
            },
        }
    }

    /// Stable snake-case name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DbdbError::NotFound(_) => "not_found",
            DbdbError::Conflict(_) => "conflict",
            DbdbError::Validation(_) => "validation",
            DbdbError::Transport(_) => "transport",
            DbdbError::Store { .. } => "store",
            DbdbError::Unauthorized(_) => "unauthorized",
            DbdbError::Bulk(_) => "bulk",
        }
    }
}

pub type Result<T> = std::result::Result<T, DbdbError>;
