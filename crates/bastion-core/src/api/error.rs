use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::ObfuscateError;
use crate::config::ConfigError;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body to avoid logging excessive data
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

/// Login and session failures, distinguished by the status the auth endpoint returned.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Login rejected as malformed (400): {0}")]
    BadRequest(String),

    #[error("Unauthorized (401): {0}")]
    Unauthorized(String),

    #[error("Forbidden (403): {0}")]
    Forbidden(String),

    #[error("Login failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Login response carried no session cookie")]
    MissingSessionCookie,
}

impl AuthError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let truncated = truncate_body(body);
        match status.as_u16() {
            400 => AuthError::BadRequest(truncated),
            401 => AuthError::Unauthorized(truncated),
            403 => AuthError::Forbidden(truncated),
            code => AuthError::Status {
                status: code,
                body: truncated,
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential obfuscation failed: {0}")]
    Obfuscate(#[from] ObfuscateError),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Gave up after {attempts} attempts, last status {status}: {body}")]
    RetriesExhausted {
        attempts: u32,
        status: u16,
        body: String,
    },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unexpected content in response (status {status}): {body}")]
    UnexpectedContent { status: u16, body: String },

    #[error("Failed to decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request cancelled")]
    Cancelled,
}

impl ApiError {
    /// Map a permanent (non-retryable) failure status to an error.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let truncated = truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Auth(AuthError::Unauthorized(truncated)),
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_short() {
        assert_eq!(truncate_body("short"), "short");
    }

    #[test]
    fn test_truncate_body_long() {
        let body = "x".repeat(600);
        let truncated = truncate_body(&body);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.ends_with("(truncated, 600 total bytes)"));
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        // 'é' is two bytes, so byte 500 falls inside a character
        let body = format!("a{}", "é".repeat(300));
        let truncated = truncate_body(&body);
        assert!(truncated.contains("truncated"));
    }

    #[test]
    fn test_auth_error_from_status() {
        assert!(matches!(
            AuthError::from_status(StatusCode::BAD_REQUEST, "bad"),
            AuthError::BadRequest(b) if b == "bad"
        ));
        assert!(matches!(
            AuthError::from_status(StatusCode::UNAUTHORIZED, ""),
            AuthError::Unauthorized(_)
        ));
        assert!(matches!(
            AuthError::from_status(StatusCode::FORBIDDEN, ""),
            AuthError::Forbidden(_)
        ));
        assert!(matches!(
            AuthError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            AuthError::Status { status: 500, .. }
        ));
    }

    #[test]
    fn test_api_error_from_status() {
        assert!(matches!(
            ApiError::from_status(StatusCode::NOT_FOUND, "gone"),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, ""),
            ApiError::AccessDenied(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, ""),
            ApiError::ServerError(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::CONFLICT, "{}"),
            ApiError::InvalidResponse(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, ""),
            ApiError::Auth(AuthError::Unauthorized(_))
        ));
    }
}
