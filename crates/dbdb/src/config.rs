use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the adapter connects and, optionally, who it logs in as.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Server URL, e.g. `http://localhost:5984`.
    pub url: String,
    /// Database name on that server.
    pub db: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Config {
    pub fn new(url: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            db: db.into(),
            key: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, key: impl Into<String>, password: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self.password = Some(password.into());
        self
    }

    /// Key and password, when both are set and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.key.as_deref(), self.password.as_deref()) {
            (Some(key), Some(password)) if !key.is_empty() && !password.is_empty() => {
                Some((key, password))
            }
            _ => None,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials().is_some()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("url", &self.url)
            .field("db", &self.db)
            .field("key", &self.key)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
