//! The client handle every generated resource wrapper goes through.
//!
//! `ApiClient` owns the session manager, response cache, rate limiter and
//! retry policy. Clones share that state, so one client can serve many
//! concurrent call sites.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::ApiError;
use super::rate_limit::RateLimiter;
use super::retry::RetryPolicy;
use crate::auth::{SessionInfo, SessionManager, SessionTimings};
use crate::cache::ResponseCache;
use crate::config::{ClientConfig, ConfigError};

pub(crate) struct ClientInner {
    pub(crate) http: Client,
    pub(crate) base_url: String,
    pub(crate) session: Arc<SessionManager>,
    pub(crate) cache: Option<ResponseCache>,
    pub(crate) limiter: RateLimiter,
    pub(crate) retry: RetryPolicy,
    /// One-shot cache bypass for the next GET.
    pub(crate) fresh: AtomicBool,
    shutdown: CancellationToken,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        // Last handle gone: stop the refresher so it never outlives the client
        self.shutdown.cancel();
    }
}

/// API client. Clone is cheap - all clones share one session, cache and
/// connection pool.
#[derive(Clone)]
pub struct ApiClient {
    pub(crate) inner: Arc<ClientInner>,
    cancel: CancellationToken,
}

impl ApiClient {
    /// Create a client and start its background session refresher.
    ///
    /// Must be called from within a Tokio runtime. No network traffic happens
    /// until the first request or an explicit [`login`](Self::login).
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let http = config.build_http_client()?;
        let base_url = config.api_base_url()?;
        let session = Arc::new(SessionManager::new(
            http.clone(),
            base_url.clone(),
            config.credentials(),
            SessionTimings::from_config(&config.session),
        ));

        let cache = config.cache.enabled.then(|| ResponseCache::new(&config.cache));
        let shutdown = CancellationToken::new();
        let refresher = session.spawn_refresher(shutdown.clone());

        debug!(
            base_url = %base_url,
            cache_enabled = cache.is_some(),
            max_retries = config.retry.max_retries,
            "API client created"
        );

        Ok(Self {
            cancel: shutdown.child_token(),
            inner: Arc::new(ClientInner {
                http,
                base_url,
                session,
                cache,
                limiter: RateLimiter::new(&config.rate_limit),
                retry: RetryPolicy::from_config(&config.retry),
                fresh: AtomicBool::new(false),
                shutdown,
                refresher: Mutex::new(Some(refresher)),
            }),
        })
    }

    /// A handle sharing this client whose requests fail with
    /// [`ApiError::Cancelled`] once `token` (or client shutdown) fires.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel: token,
        }
    }

    /// Log in ahead of the first request.
    pub async fn login(&self) -> Result<(), ApiError> {
        self.inner.session.login().await
    }

    /// Make the next GET skip the cache. The bypass is used up by that GET.
    pub fn fresh(&self) -> &Self {
        self.inner.fresh.store(true, Ordering::Release);
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.session.is_authenticated()
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.inner.session.session_info()
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn clear_cache(&self) {
        if let Some(ref cache) = self.inner.cache {
            cache.clear();
        }
    }

    /// Stop the background refresher and wait for it to exit. Requests issued
    /// afterwards fail with [`ApiError::Cancelled`].
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handle = self.inner.refresher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!(error = %e, "Session refresher ended abnormally");
            }
        }
    }

    /// Stop the refresher, then delete the remote session (best effort).
    pub async fn logout(&self) {
        self.shutdown().await;
        self.inner.session.logout().await;
        self.clear_cache();
        info!("Client shut down");
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.inner.shutdown.is_cancelled()
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), ApiError> {
        if self.is_cancelled() {
            Err(ApiError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when this handle's token or the client shutdown fires.
    pub(crate) async fn cancelled(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.inner.shutdown.cancelled() => {}
        }
    }

    /// Sleep that gives up early with [`ApiError::Cancelled`].
    pub(crate) async fn sleep(&self, delay: Duration) -> Result<(), ApiError> {
        if delay.is_zero() {
            return self.check_cancelled();
        }
        tokio::select! {
            _ = self.cancelled() => Err(ApiError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url)
            .field("cache_enabled", &self.inner.cache.is_some())
            .field("retry", &self.inner.retry)
            .finish_non_exhaustive()
    }
}
