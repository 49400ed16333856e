//! Client configuration.
//!
//! The configuration is supplied fully populated by the embedding
//! application (this crate never reads files or keychains). It carries the
//! credentials, the cloud the tenant lives in, and the tunables for retries,
//! caching, rate limiting and the HTTP transport.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::auth::Credentials;

/// User agent sent with every request unless overridden
const DEFAULT_USER_AGENT: &str = concat!("bastion/", env!("CARGO_PKG_VERSION"));

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 240;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Invalid proxy configuration: {0}")]
    InvalidProxy(String),

    #[error("Invalid retry configuration: {0}")]
    InvalidRetry(String),

    #[error("Invalid session configuration: {0}")]
    InvalidSession(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("A Tokio runtime is required to start the session refresher")]
    NoRuntime,
}

#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    pub username: String,
    pub password: String,
    pub api_key: String,
    /// Cloud the tenant is provisioned in, e.g. `zscloud`.
    pub cloud: String,
    /// Overrides the URL derived from `cloud` (private clouds, tests).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Accept any TLS certificate. Only meant for test environments.
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: u32,
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 100,
            min_wait_ms: 2_000,
            max_wait_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn min_wait(&self) -> Duration {
        Duration::from_millis(self.min_wait_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    /// Entries not read within this window are evicted.
    pub idle_secs: u64,
    pub max_size_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 600,
            idle_secs: 480,
            max_size_mb: 64,
        }
    }
}

/// Requests admitted per method class within one window.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub get_limit: usize,
    pub write_limit: usize,
    pub delete_limit: usize,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            get_limit: 20,
            write_limit: 10,
            delete_limit: 1,
            window_ms: 1_000,
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Used when the login response carries no password-expiry hint.
    pub default_timeout_secs: u64,
    /// How long before expiry the session is proactively refreshed.
    pub refresh_offset_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30 * 60,
            refresh_offset_secs: 5 * 60,
        }
    }
}

// Keep secrets out of logs
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("api_key", &"<redacted>")
            .field("cloud", &self.cloud)
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("retry", &self.retry)
            .field("cache", &self.cache)
            .field("rate_limit", &self.rate_limit)
            .field("proxy", &self.proxy)
            .field("session", &self.session)
            .finish()
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl ClientConfig {
    /// Configuration with default tunables for the given credentials.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        api_key: impl Into<String>,
        cloud: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            api_key: api_key.into(),
            cloud: cloud.into(),
            base_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            user_agent: default_user_agent(),
            insecure_skip_tls_verify: false,
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            proxy: None,
            session: SessionConfig::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Check that everything needed before the first network call is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.trim().is_empty() {
            return Err(ConfigError::Missing("username"));
        }
        if self.password.is_empty() {
            return Err(ConfigError::Missing("password"));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("api_key"));
        }
        if self.cloud.trim().is_empty() && self.base_url.is_none() {
            return Err(ConfigError::Missing("cloud"));
        }
        if self.retry.min_wait_ms > self.retry.max_wait_ms {
            return Err(ConfigError::InvalidRetry(format!(
                "min_wait_ms ({}) exceeds max_wait_ms ({})",
                self.retry.min_wait_ms, self.retry.max_wait_ms
            )));
        }
        if self.session.default_timeout_secs == 0 {
            return Err(ConfigError::InvalidSession(
                "default_timeout_secs must be positive".to_string(),
            ));
        }
        if let Some(ref proxy) = self.proxy {
            if proxy.host.trim().is_empty() {
                return Err(ConfigError::InvalidProxy("empty proxy host".to_string()));
            }
        }
        self.api_base_url()?;
        Ok(())
    }

    /// Base URL all endpoint paths are resolved against, without a trailing slash.
    pub fn api_base_url(&self) -> Result<String, ConfigError> {
        let raw = match self.base_url {
            Some(ref url) => url.clone(),
            None => format!("https://zsapi.{}.net/api/v1", self.cloud.trim()),
        };
        let parsed = Url::parse(&raw).map_err(|e| ConfigError::InvalidBaseUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(ConfigError::InvalidBaseUrl {
                url: raw,
                reason: "URL cannot be a base".to_string(),
            });
        }
        Ok(raw.trim_end_matches('/').to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.username.clone(),
            self.password.clone(),
            self.api_key.clone(),
            self.cloud.clone(),
        )
    }

    /// Build the shared reqwest client (timeout, user agent, proxy, TLS).
    pub(crate) fn build_http_client(&self) -> Result<reqwest::Client, ConfigError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.request_timeout())
            .user_agent(self.user_agent.clone());

        if let Some(ref proxy) = self.proxy {
            let proxy_url = format!("http://{}:{}", proxy.host, proxy.port);
            let mut p = reqwest::Proxy::all(&proxy_url)
                .map_err(|e| ConfigError::InvalidProxy(e.to_string()))?;
            if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
                p = p.basic_auth(user, pass);
            }
            builder = builder.proxy(p);
        }

        if self.insecure_skip_tls_verify {
            tracing::warn!("TLS certificate verification disabled - do not use in production");
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))
    }
}
