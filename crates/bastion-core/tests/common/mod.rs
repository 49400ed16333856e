#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bastion_core::{ApiClient, ClientConfig, RateLimitConfig, RetryConfig};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const API_PREFIX: &str = "/api/v1";
pub const LOGIN_PATH: &str = "/api/v1/authenticatedSession";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Full mock path for an endpoint.
pub fn api_path(endpoint: &str) -> String {
    format!("{}{}", API_PREFIX, endpoint)
}

/// Fast retries and no client-side rate limiting.
pub fn config(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::new("admin@example.com", "secret", "abcdefghijklmnop", "zscloud")
        .with_base_url(format!("{}{}", server.uri(), API_PREFIX));
    config.retry = RetryConfig {
        max_retries: 3,
        min_wait_ms: 10,
        max_wait_ms: 50,
    };
    config.rate_limit = RateLimitConfig {
        get_limit: 0,
        write_limit: 0,
        delete_limit: 0,
        window_ms: 1_000,
    };
    config
}

pub fn client(server: &MockServer) -> ApiClient {
    init_tracing();
    ApiClient::new(config(server)).expect("client should build")
}

pub fn cached_client(server: &MockServer) -> ApiClient {
    init_tracing();
    let mut config = config(server);
    config.cache.enabled = true;
    ApiClient::new(config).expect("client should build")
}

fn login_response(token: &str, expiry_secs: i64) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("set-cookie", format!("JSESSIONID={}; Path=/; Secure; HttpOnly", token).as_str())
        .set_body_json(json!({
            "authType": "ADMIN_LOGIN",
            "obfuscateApiKey": false,
            "passwordExpiryTime": expiry_secs,
            "passwordExpiryDays": 0
        }))
}

/// Login endpoint handing out `token-1`, `token-2`, ... on successive logins.
/// Returns the login counter.
pub async fn mount_login(server: &MockServer) -> Arc<AtomicUsize> {
    mount_login_with_delay(server, Duration::ZERO).await
}

pub async fn mount_login_with_delay(server: &MockServer, delay: Duration) -> Arc<AtomicUsize> {
    mount_login_responding(server, delay, 0).await
}

/// Login endpoint whose responses carry a password-expiry hint in seconds.
pub async fn mount_login_with_expiry(server: &MockServer, expiry_secs: i64) -> Arc<AtomicUsize> {
    mount_login_responding(server, Duration::ZERO, expiry_secs).await
}

async fn mount_login_responding(server: &MockServer, delay: Duration, expiry_secs: i64) -> Arc<AtomicUsize> {
    let logins = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&logins);
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(move |_: &Request| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            login_response(&format!("token-{}", n), expiry_secs).set_delay(delay)
        })
        .mount(server)
        .await;
    logins
}

/// Requests the server received for `method` on `full_path`.
pub async fn requests_to(server: &MockServer, http_method: &str, full_path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == http_method && r.url.path() == full_path)
        .collect()
}
