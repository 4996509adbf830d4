//! Stream endpoint discovery.
//!
//! The hosting shell provides the stream URL and a pre-issued access key once
//! at startup. Both are opaque strings here; the key travels as the `key`
//! query parameter of the stream URL.

use url::Url;

use crate::error::{Result, SyncError};

pub const ACCESS_KEY_PARAM: &str = "key";

/// Where the stream URL and access key come from.
pub trait EndpointSource {
    fn stream_url(&self) -> Result<String>;
    fn access_key(&self) -> Result<String>;
}

/// Endpoint values known up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticEndpoint {
    pub url: String,
    pub access_key: String,
}

impl StaticEndpoint {
    pub fn new(url: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_key: access_key.into(),
        }
    }
}

impl EndpointSource for StaticEndpoint {
    fn stream_url(&self) -> Result<String> {
        Ok(self.url.clone())
    }

    fn access_key(&self) -> Result<String> {
        Ok(self.access_key.clone())
    }
}

/// Queries `source` once and builds the URL the transport connects to.
pub fn resolve(source: &dyn EndpointSource) -> Result<String> {
    let base = source.stream_url()?;
    if base.trim().is_empty() {
        return Err(SyncError::endpoint("stream url is empty"));
    }
    let key = source.access_key()?;
    build_stream_url(&base, &key)
}

/// Normalizes `base_url` to a WebSocket URL and sets the access key,
/// replacing any key already present and keeping other query parameters.
pub fn build_stream_url(base_url: &str, access_key: &str) -> Result<String> {
    let raw = base_url.trim();
    let normalized = if raw.starts_with("wss://") || raw.starts_with("ws://") {
        raw.to_string()
    } else if let Some(rest) = raw.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = raw.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{raw}")
    };

    let mut url = Url::parse(&normalized)?;
    let preserved: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != ACCESS_KEY_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in preserved {
            pairs.append_pair(&k, &v);
        }
        if !access_key.is_empty() {
            pairs.append_pair(ACCESS_KEY_PARAM, access_key);
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }

    Ok(url.to_string())
}
