mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bastion_core::{ApiClient, ApiError, AuthError};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use common::{api_path, cached_client, client, config, mount_login, requests_to};

/// Responds with `first` for the first `times` requests, then 200 with `body`.
fn fail_then_succeed(
    times: usize,
    first: ResponseTemplate,
    body: Value,
) -> impl Fn(&Request) -> ResponseTemplate + Send + Sync + 'static {
    let calls = Arc::new(AtomicUsize::new(0));
    move |_: &Request| {
        if calls.fetch_add(1, Ordering::SeqCst) < times {
            first.clone()
        } else {
            ResponseTemplate::new(200).set_body_json(body.clone())
        }
    }
}

#[tokio::test]
async fn test_cached_read_skips_network() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(api_path("/locations")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .expect(1)
        .mount(&server)
        .await;

    let client = cached_client(&server);
    let first: Vec<Value> = client.read("/locations").await.unwrap();
    let second: Vec<Value> = client.read("/locations").await.unwrap();
    assert_eq!(first, second);
    client.shutdown().await;
}

#[tokio::test]
async fn test_fresh_bypasses_cache_once() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(api_path("/locations")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;

    let client = cached_client(&server);
    let _: Vec<Value> = client.read("/locations").await.unwrap();
    let _: Vec<Value> = client.fresh().read("/locations").await.unwrap();
    // Bypass used up; served from the refreshed entry
    let _: Vec<Value> = client.read("/locations").await.unwrap();
    client.shutdown().await;
}

#[tokio::test]
async fn test_write_invalidates_cached_reads() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(api_path("/locations")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 5}])))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(api_path("/locations/5")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 5, "name": "HQ"})))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(api_path("/locations")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 6, "name": "Branch"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(api_path("/locations/5")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = cached_client(&server);
    let _: Vec<Value> = client.read("/locations").await.unwrap();
    let _: Value = client.read("/locations/5").await.unwrap();

    // A create drops the collection and everything beneath it
    client.create("/locations", &json!({"name": "Branch"})).await.unwrap();
    let _: Vec<Value> = client.read("/locations").await.unwrap();
    let _: Value = client.read("/locations/5").await.unwrap();

    // An update of a member drops the member and its collection
    let updated: Option<Value> = client
        .update_with_put("/locations/5", &json!({"id": 5, "name": "HQ2"}))
        .await
        .unwrap();
    assert!(updated.is_none());
    let _: Vec<Value> = client.read("/locations").await.unwrap();
    let _: Value = client.read("/locations/5").await.unwrap();
    client.shutdown().await;
}

#[tokio::test]
async fn test_retry_after_header_is_honored() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(api_path("/users")))
        .respond_with(fail_then_succeed(
            1,
            ResponseTemplate::new(429).insert_header("retry-after", "2"),
            json!([]),
        ))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    client.login().await.unwrap();
    let started = Instant::now();
    let users: Vec<Value> = client.read("/users").await.unwrap();
    assert!(users.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(2));
    client.shutdown().await;
}

#[tokio::test]
async fn test_throttled_then_success() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(api_path("/users")))
        .respond_with(fail_then_succeed(
            2,
            ResponseTemplate::new(503).set_body_string("<html>unavailable</html>"),
            json!([{"id": 1}]),
        ))
        .expect(3)
        .mount(&server)
        .await;

    let client = client(&server);
    let users: Vec<Value> = client.read("/users").await.unwrap();
    assert_eq!(users.len(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn test_edit_lock_retried_until_exhausted() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("PUT"))
        .and(path(api_path("/users/7")))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({"code": "EDIT_LOCK_NOT_AVAILABLE", "message": "busy"})),
        )
        .expect(4)
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client
        .update_with_put::<Value>("/users/7", &json!({"id": 7}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::RetriesExhausted { attempts: 4, status: 409, ref body } if body.contains("EDIT_LOCK")
    ));
    client.shutdown().await;
}

#[tokio::test]
async fn test_unknown_conflict_is_not_retried() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path(api_path("/users")))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"code": "DUPLICATE_ITEM"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client.create("/users", &json!({"name": "bob"})).await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidResponse(ref msg) if msg.contains("DUPLICATE_ITEM")));
    client.shutdown().await;
}

#[tokio::test]
async fn test_not_found_and_server_errors() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(api_path("/users/404")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(api_path("/users/500")))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(matches!(client.read::<Value>("/users/404").await, Err(ApiError::NotFound(_))));
    assert!(matches!(client.read::<Value>("/users/500").await, Err(ApiError::ServerError(_))));
    client.shutdown().await;
}

#[tokio::test]
async fn test_rejected_session_is_refreshed_and_replayed() {
    let server = MockServer::start().await;
    let logins = mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(api_path("/status")))
        .and(header("cookie", "JSESSIONID=token-1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"code": "SESSION_NOT_VALID"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(api_path("/status")))
        .and(header("cookie", "JSESSIONID=token-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ACTIVE"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let status: Value = client.read("/status").await.unwrap();
    assert_eq!(status["status"], "ACTIVE");
    assert_eq!(logins.load(Ordering::SeqCst), 2);
    client.shutdown().await;
}

#[tokio::test]
async fn test_second_rejection_is_an_auth_error() {
    let server = MockServer::start().await;
    let logins = mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(api_path("/status")))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client.read::<Value>("/status").await.unwrap_err();
    assert!(matches!(err, ApiError::Auth(AuthError::Unauthorized(_))));
    assert_eq!(logins.load(Ordering::SeqCst), 2);
    client.shutdown().await;
}

#[tokio::test]
async fn test_cancellation_interrupts_request() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(api_path("/slow")))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(api_path("/status")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ACTIVE"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.login().await.unwrap();
    let token = CancellationToken::new();
    let scoped = client.with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });
    let started = Instant::now();
    let err = scoped.read::<Value>("/slow").await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
    canceller.await.unwrap();

    // The parent client is unaffected
    let status: Value = client.read("/status").await.unwrap();
    assert_eq!(status["status"], "ACTIVE");
    client.shutdown().await;
}

#[tokio::test]
async fn test_cancellation_interrupts_backoff() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(api_path("/busy")))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
        .mount(&server)
        .await;

    let client = client(&server);
    let token = CancellationToken::new();
    let scoped = client.with_cancellation(token.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let started = Instant::now();
    assert!(matches!(scoped.read::<Value>("/busy").await, Err(ApiError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(requests_to(&server, "GET", &api_path("/busy")).await.len(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_spaces_requests() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("DELETE"))
        .and(path(api_path("/users/1")))
        .respond_with(ResponseTemplate::new(204))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.rate_limit.delete_limit = 1;
    config.rate_limit.window_ms = 300;
    let client = ApiClient::new(config).unwrap();
    client.login().await.unwrap();

    let started = Instant::now();
    for _ in 0..3 {
        client.delete("/users/1").await.unwrap();
    }
    assert!(started.elapsed() >= Duration::from_millis(600));
    client.shutdown().await;
}

#[tokio::test]
async fn test_throttled_without_retry_after_waits_for_rate_window() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(api_path("/users")))
        .respond_with(fail_then_succeed(1, ResponseTemplate::new(429), json!([])))
        .expect(2)
        .mount(&server)
        .await;

    // Backoff alone would be 10ms; the limiter holds the retry for the window
    let mut config = config(&server);
    config.rate_limit.get_limit = 1;
    config.rate_limit.window_ms = 500;
    let client = ApiClient::new(config).unwrap();
    client.login().await.unwrap();

    let started = Instant::now();
    let users: Vec<Value> = client.read("/users").await.unwrap();
    assert!(users.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(400));
    client.shutdown().await;
}

#[tokio::test]
async fn test_retry_after_body_field_is_honored() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(api_path("/users")))
        .respond_with(fail_then_succeed(
            1,
            ResponseTemplate::new(429).set_body_json(json!({"Retry-After": "1 seconds"})),
            json!([{"id": 1}]),
        ))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    client.login().await.unwrap();
    let started = Instant::now();
    let users: Vec<Value> = client.read("/users").await.unwrap();
    assert_eq!(users.len(), 1);
    assert!(started.elapsed() >= Duration::from_secs(1));
    client.shutdown().await;
}

#[tokio::test]
async fn test_timed_out_request_is_retried() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path(api_path("/users")))
        .respond_with(fail_then_succeed(
            1,
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(3)),
            json!([{"id": 1}]),
        ))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.request_timeout_secs = 1;
    let client = ApiClient::new(config).unwrap();
    client.login().await.unwrap();

    let users: Vec<Value> = client.read("/users").await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(requests_to(&server, "GET", &api_path("/users")).await.len(), 2);
    client.shutdown().await;
}
