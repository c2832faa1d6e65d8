/// CouchDB cookie authentication (`_session` endpoint).
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::SET_COOKIE;
use serde::Deserialize;
use tracing::{debug, info};

use dbdb_core::error::{DbdbError, Result};
use dbdb_core::session::{SESSION_COOKIE_PREFIX, SessionCookie};
use dbdb_core::store::{DocumentStore, Transport};

use crate::{HttpAdapter, check_error, transport, urlencoded};

/// Body of a successful `POST /_session`.
#[derive(Debug, Default, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

/// Entry point to a CouchDB server.
///
/// Cookies are handled explicitly rather than through a cookie store: the
/// session cookie returned by [`Transport::authenticate`] is handed to every
/// [`HttpAdapter`] opened with it.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    server_url: String,
}

impl HttpTransport {
    /// Create a transport for the given server URL, e.g.
    /// `http://localhost:5984`.
    pub fn new(server_url: &str) -> Self {
        Self::with_client(server_url, Client::new())
    }

    pub fn with_client(server_url: &str, client: Client) -> Self {
        Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn authenticate(&self, key: &str, password: &str) -> Result<SessionCookie> {
        debug!(server = %self.server_url, key, "requesting session");
        let resp = self
            .client
            .post(format!("{}/_session", self.server_url))
            .json(&serde_json::json!({"name": key, "password": password}))
            .send()
            .await
            .map_err(transport)?;
        let resp = check_error(resp).await?;

        let cookie = SessionCookie::select(
            resp.headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok()),
            SESSION_COOKIE_PREFIX,
        )
        .ok_or_else(|| {
            DbdbError::Transport("session reply did not set an AuthSession cookie".into())
        })?;

        let login: LoginResponse = resp.json().await.unwrap_or_default();
        info!(
            user = login.name.as_deref().unwrap_or(key),
            roles = ?login.roles,
            "authenticated"
        );
        Ok(cookie)
    }

    fn open(&self, db: &str, session: Option<SessionCookie>) -> Arc<dyn DocumentStore> {
        let url = format!("{}/{}", self.server_url, urlencoded(db));
        Arc::new(HttpAdapter::with_client(&url, self.client.clone()).with_session(session))
    }
}
