/// Session cookies issued by CouchDB's `_session` endpoint.
use std::fmt;

/// Name prefix of the CouchDB session cookie.
pub const SESSION_COOKIE_PREFIX: &str = "AuthSession";

/// A cookie reduced to its `name=value` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse one `Set-Cookie` header value, dropping its attributes
    /// (`Path`, `Expires`, `HttpOnly`, ...).
    pub fn parse(header: &str) -> Option<Self> {
        let pair = header.split(';').next()?.trim();
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name, value.trim()))
    }

    /// Pick the first cookie whose name starts with `prefix`.
    ///
    /// Headers that do not parse as cookies are skipped.
    pub fn select<I, S>(headers: I, prefix: &str) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        headers
            .into_iter()
            .filter_map(|h| Self::parse(h.as_ref()))
            .find(|c| c.name.starts_with(prefix))
    }
}

/// Renders the `Cookie` request header value.
impl fmt::Display for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}
