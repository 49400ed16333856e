//! The request pipeline: cache, rate limit, authenticate, send, retry.

use std::sync::atomic::Ordering;
use std::time::Duration;

use reqwest::header;
use tracing::{debug, info, instrument, warn};

use super::client::ApiClient;
use super::error::{truncate_body, ApiError, AuthError};
use super::request::{cache_key, ApiRequest, ApiResponse};
use super::retry::{is_session_lost, retry_after, should_retry_error};
use crate::auth::manager::session_cookie;

/// Bookkeeping for one logical request across its attempts.
#[derive(Debug, Default)]
struct RetryState {
    attempts: u32,
    retries: u32,
    /// The session has already been replaced once for this request.
    session_refreshed: bool,
}

impl ApiClient {
    /// Send a request through the full pipeline.
    ///
    /// Successful GETs are served from and stored in the response cache when
    /// it is enabled. Successful writes invalidate cached reads of the same
    /// resource and its collection.
    #[instrument(skip_all, fields(method = %request.method, endpoint = %request.endpoint))]
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.check_cancelled()?;

        let key = request.cache_key();
        if request.is_get() {
            if let Some(cached) = self.cached(&key) {
                return Ok(cached);
            }
        }

        let response = self.send_with_retry(&request).await?;
        self.record(&request, key, &response);
        Ok(response)
    }

    fn cached(&self, key: &str) -> Option<ApiResponse> {
        let cache = self.inner.cache.as_ref()?;
        if self.inner.fresh.swap(false, Ordering::AcqRel) {
            debug!(key, "Bypassing cache for fresh read");
            return None;
        }
        cache.get(key).map(|entry| entry.response.clone())
    }

    fn record(&self, request: &ApiRequest, key: String, response: &ApiResponse) {
        let Some(ref cache) = self.inner.cache else {
            return;
        };
        if request.is_get() {
            cache.insert(key, response.clone());
            return;
        }

        let path = request.path();
        cache.invalidate(&cache_key(&reqwest::Method::GET, &request.endpoint));
        cache.invalidate_prefix(path);
        if let Some(parent) = parent_collection(path) {
            cache.invalidate_prefix(parent);
        }
    }

    async fn send_with_retry(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let policy = &self.inner.retry;
        let mut state = RetryState::default();

        loop {
            self.check_cancelled()?;
            self.throttle(request).await?;

            let token = tokio::select! {
                _ = self.cancelled() => return Err(ApiError::Cancelled),
                token = self.inner.session.ensure_valid() => token?,
            };

            state.attempts += 1;
            debug!(attempt = state.attempts, "Sending request");
            let response = match self.send_once(request, &token).await {
                Ok(response) => response,
                Err(ApiError::Network(e))
                    if should_retry_error(&e) && state.retries < policy.max_retries =>
                {
                    let delay = policy.backoff(state.retries);
                    state.retries += 1;
                    warn!(
                        endpoint = %request.endpoint,
                        error = %e,
                        retry = state.retries,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    self.sleep(delay).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if response.is_success() {
                debug!(
                    method = %request.method,
                    endpoint = %request.endpoint,
                    status = %response.status,
                    attempts = state.attempts,
                    "Request succeeded"
                );
                return Ok(response);
            }

            if policy.is_retryable(&response) {
                if state.retries >= policy.max_retries {
                    warn!(
                        endpoint = %request.endpoint,
                        status = %response.status,
                        attempts = state.attempts,
                        "Retries exhausted"
                    );
                    return Err(ApiError::RetriesExhausted {
                        attempts: state.attempts,
                        status: response.status.as_u16(),
                        body: truncate_body(&response.body),
                    });
                }
                let delay = self.retry_delay(request, &response, state.retries);
                state.retries += 1;
                warn!(
                    endpoint = %request.endpoint,
                    status = %response.status,
                    retry = state.retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retryable response, backing off"
                );
                self.sleep(delay).await?;
                continue;
            }

            if is_session_lost(&response) {
                if state.session_refreshed {
                    warn!(endpoint = %request.endpoint, "Session rejected again after refresh");
                    return Err(AuthError::Unauthorized(truncate_body(&response.body)).into());
                }
                state.session_refreshed = true;
                info!(endpoint = %request.endpoint, "Session rejected, refreshing and replaying");
                tokio::select! {
                    _ = self.cancelled() => return Err(ApiError::Cancelled),
                    refreshed = self.inner.session.force_refresh(&token) => { refreshed?; }
                }
                continue;
            }

            return Err(ApiError::from_status(response.status, &response.body));
        }
    }

    /// Wait until the rate limiter admits one more request of this method.
    async fn throttle(&self, request: &ApiRequest) -> Result<(), ApiError> {
        while let Some(delay) = self.inner.limiter.wait(&request.method) {
            debug!(
                method = %request.method,
                delay_ms = delay.as_millis() as u64,
                "Rate limit reached, waiting"
            );
            self.sleep(delay).await?;
        }
        Ok(())
    }

    /// Server-supplied wait first, then the limiter's wait for throttled
    /// responses, then exponential backoff.
    fn retry_delay(&self, request: &ApiRequest, response: &ApiResponse, retry: u32) -> Duration {
        if let Some(delay) = retry_after(response) {
            return delay;
        }
        if response.status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            if let Some(delay) = self.inner.limiter.delay_for(&request.method) {
                return delay;
            }
        }
        self.inner.retry.backoff(retry)
    }

    async fn send_once(&self, request: &ApiRequest, token: &str) -> Result<ApiResponse, ApiError> {
        let url = format!("{}{}", self.inner.base_url, request.endpoint);
        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), &url)
            .header(header::COOKIE, session_cookie(token))
            .header(header::ACCEPT, "application/json");
        if let Some(ref body) = request.body {
            builder = builder
                .header(header::CONTENT_TYPE, request.content_type)
                .body(body.clone());
        }

        let response = tokio::select! {
            _ = self.cancelled() => return Err(ApiError::Cancelled),
            sent = builder.send() => sent?,
        };
        let status = response.status();
        let headers = response.headers().clone();
        let body = tokio::select! {
            _ = self.cancelled() => return Err(ApiError::Cancelled),
            text = response.text() => text?,
        };

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// Collection a nested resource path belongs to: `/locations/12` gives
/// `/locations`. Top-level paths have none.
fn parent_collection(path: &str) -> Option<&str> {
    let (parent, _) = path.rsplit_once('/')?;
    (!parent.is_empty()).then_some(parent)
}
