//! Retry policy for the transport: what to retry and how long to wait.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde_json::Value;

use super::request::ApiResponse;
use crate::config::RetryConfig;

/// Error codes on 401/409/412 responses that indicate a temporary conflict
/// rather than a permanent failure.
pub const TRANSIENT_ERROR_CODES: &[&str] = &[
    "EDIT_LOCK_NOT_AVAILABLE",
    "ORG_BARRIER_FAILURE",
    "RESOURCE_ACCESS_BLOCKED",
];

/// Marker the service puts in a body when the session token is no longer valid.
pub const SESSION_INVALID_MARKER: &str = "SESSION_NOT_VALID";

/// Body field some endpoints use instead of the `Retry-After` header.
const RETRY_AFTER_FIELD: &str = "Retry-After";

/// Highest doubling applied to the minimum wait.
const MAX_BACKOFF_SHIFT: u32 = 16;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            min_wait: config.min_wait(),
            max_wait: config.max_wait(),
        }
    }

    /// Exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            min_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
        }
    }

    /// Exponential delay before retry number `retry` (0-based), capped at `max_wait`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let multiplier = 1u32 << retry.min(MAX_BACKOFF_SHIFT);
        self.min_wait.saturating_mul(multiplier).min(self.max_wait)
    }

    /// Whether a failed response is worth sending again.
    pub fn is_retryable(&self, response: &ApiResponse) -> bool {
        match response.status {
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => true,
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED | StatusCode::UNAUTHORIZED => {
                error_code(&response.body)
                    .map(|code| TRANSIENT_ERROR_CODES.contains(&code.as_str()))
                    .unwrap_or(false)
            }
            _ => false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Structured `code` field of an error body, if the body is JSON.
pub fn error_code(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value.get("code")?.as_str().map(str::to_string)
}

/// True when the response says the session is gone rather than the request bad.
pub fn is_session_lost(response: &ApiResponse) -> bool {
    response.status == StatusCode::UNAUTHORIZED || response.body.contains(SESSION_INVALID_MARKER)
}

/// Server-requested wait, from the `Retry-After` header or the body field of
/// the same name. Values are seconds, optionally followed by a unit word.
pub fn retry_after(response: &ApiResponse) -> Option<Duration> {
    let from_header = response
        .headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_seconds);
    if from_header.is_some() {
        return from_header;
    }

    let value: Value = serde_json::from_str(&response.body).ok()?;
    match value.get(RETRY_AFTER_FIELD)? {
        Value::Number(n) => n.as_u64().map(Duration::from_secs),
        Value::String(s) => parse_seconds(s),
        _ => None,
    }
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok().map(Duration::from_secs)
}

/// Connection failures and timeouts are transient; everything else is not.
pub fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}
