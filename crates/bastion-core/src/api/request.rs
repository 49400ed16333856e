//! Replayable request descriptions and captured responses.

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use url::form_urlencoded;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_MERGE_PATCH: &str = "application/merge-patch+json";

/// Everything needed to send (and resend) one logical request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, optionally with a query string.
    pub endpoint: String,
    pub body: Option<String>,
    pub content_type: &'static str,
}

impl ApiRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: normalize_endpoint(&endpoint.into()),
            body: None,
            content_type: CONTENT_TYPE_JSON,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn with_body(mut self, body: String, content_type: &'static str) -> Self {
        self.body = Some(body);
        self.content_type = content_type;
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    /// Endpoint without its query string.
    pub fn path(&self) -> &str {
        endpoint_path(&self.endpoint)
    }

    /// Canonical `METHOD path?query` key with query pairs sorted.
    pub fn cache_key(&self) -> String {
        cache_key(&self.method, &self.endpoint)
    }
}

/// A fully read response. Bodies are small JSON documents, so they are
/// captured eagerly to make responses cacheable and inspectable for retry.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn has_content(&self) -> bool {
        self.status != StatusCode::NO_CONTENT && !self.body.trim().is_empty()
    }
}

/// Ensure a leading slash and drop trailing slashes from the path part.
fn normalize_endpoint(endpoint: &str) -> String {
    let (path, query) = match endpoint.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (endpoint, None),
    };
    let trimmed = path.trim_end_matches('/');
    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        normalized.push('?');
        normalized.push_str(query);
    }
    normalized
}

pub(crate) fn endpoint_path(endpoint: &str) -> &str {
    endpoint.split_once('?').map_or(endpoint, |(path, _)| path)
}

pub(crate) fn cache_key(method: &Method, endpoint: &str) -> String {
    let endpoint = normalize_endpoint(endpoint);
    let Some((path, query)) = endpoint.split_once('?') else {
        return format!("{} {}", method, endpoint);
    };

    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    pairs.sort();
    let canonical = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    format!("{} {}?{}", method, path, canonical)
}

/// Path part of a cache key produced by [`cache_key`].
pub(crate) fn cache_key_path(key: &str) -> &str {
    let endpoint = key.split_once(' ').map_or(key, |(_, rest)| rest);
    endpoint_path(endpoint)
}

/// Append query parameters, merging with any query string already present.
pub fn with_query(endpoint: &str, params: &[(&str, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in params {
        serializer.append_pair(name, value);
    }
    let extra = serializer.finish();
    if extra.is_empty() {
        return endpoint.to_string();
    }
    match endpoint.split_once('?') {
        Some((_, existing)) if !existing.is_empty() => format!("{}&{}", endpoint, extra),
        Some((path, _)) => format!("{}?{}", path, extra),
        None => format!("{}?{}", endpoint, extra),
    }
}
