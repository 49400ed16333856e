//! Session lifecycle: login, single-flight refresh, proactive renewal and logout.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::credentials::Credentials;
use super::obfuscate::obfuscate_api_key;
use super::session::{parse_session_cookie, SessionData, SessionTimings, SESSION_COOKIE};
use crate::api::error::{ApiError, AuthError};

/// Path (relative to the API base URL) of the session resource.
pub const AUTH_PATH: &str = "/authenticatedSession";

/// Pause before the background refresher retries a failed login.
const BACKGROUND_RETRY_DELAY: StdDuration = StdDuration::from_secs(30);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    api_key: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    #[serde(default)]
    auth_type: String,
    #[serde(default = "no_expiry_hint")]
    password_expiry_time: i64,
}

fn no_expiry_hint() -> i64 {
    -1
}

impl Default for LoginResponse {
    fn default() -> Self {
        Self {
            auth_type: String::new(),
            password_expiry_time: no_expiry_hint(),
        }
    }
}

/// Diagnostics snapshot of the current session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub auth_type: String,
    pub refreshed_at: DateTime<Utc>,
    pub minutes_until_expiry: i64,
}

#[derive(Debug, Default)]
struct SessionState {
    session: Option<SessionData>,
    refreshing: bool,
}

/// What a caller needs from the session before it may proceed.
#[derive(Debug, Clone, Copy)]
enum Need<'a> {
    /// Any session that is not yet due for refresh.
    Valid,
    /// A session other than the one the server just rejected.
    Replace(&'a str),
    /// A brand new login regardless of the current session.
    Fresh,
}

impl SessionState {
    fn usable_token(&self, need: Need<'_>, timings: &SessionTimings) -> Option<String> {
        let session = self.session.as_ref()?;
        if session.needs_refresh(timings) {
            return None;
        }
        match need {
            Need::Valid => Some(session.token.clone()),
            Need::Replace(stale) if session.token != stale => Some(session.token.clone()),
            Need::Replace(_) | Need::Fresh => None,
        }
    }
}

/// Owns the authenticated session and serializes every login.
///
/// All session state sits behind one lock that is never held across an
/// await. Exactly one caller performs a login at a time; the others wait on
/// a notification and then reuse the session it installed.
pub struct SessionManager {
    http: Client,
    base_url: String,
    credentials: Credentials,
    timings: SessionTimings,
    state: Mutex<SessionState>,
    refresh_done: Notify,
    installed: watch::Sender<u64>,
}

/// Clears the refreshing flag even if the login future is dropped mid-flight.
struct RefreshGuard<'a> {
    manager: &'a SessionManager,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.manager.state.lock().refreshing = false;
        self.manager.refresh_done.notify_waiters();
    }
}

impl SessionManager {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        credentials: Credentials,
        timings: SessionTimings,
    ) -> Self {
        let (installed, _) = watch::channel(0);
        Self {
            http,
            base_url: base_url.into(),
            credentials,
            timings,
            state: Mutex::new(SessionState::default()),
            refresh_done: Notify::new(),
            installed,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Return a usable session token, logging in first if there is none or
    /// the current one is due for refresh.
    pub async fn ensure_valid(&self) -> Result<String, ApiError> {
        self.acquire(Need::Valid).await
    }

    /// Replace a session the server rejected. If another caller already
    /// replaced `stale_token`, its session is reused without a new login.
    pub async fn force_refresh(&self, stale_token: &str) -> Result<String, ApiError> {
        self.acquire(Need::Replace(stale_token)).await
    }

    /// Log in now, replacing any existing session.
    pub async fn login(&self) -> Result<(), ApiError> {
        self.acquire(Need::Fresh).await.map(|_| ())
    }

    async fn acquire(&self, need: Need<'_>) -> Result<String, ApiError> {
        loop {
            // Registered before the check so a refresh finishing in between still wakes us
            let notified = self.refresh_done.notified();
            {
                let mut state = self.state.lock();
                if !state.refreshing {
                    if let Some(token) = state.usable_token(need, &self.timings) {
                        return Ok(token);
                    }
                    state.refreshing = true;
                    break;
                }
            }
            debug!("Waiting for in-flight session refresh");
            notified.await;
        }

        let guard = RefreshGuard { manager: self };
        let result = self.perform_login().await;
        {
            let mut state = self.state.lock();
            match result {
                Ok(ref session) => state.session = Some(session.clone()),
                Err(ApiError::Auth(_)) => state.session = None,
                Err(_) => {}
            }
        }
        drop(guard);

        let session = result?;
        self.installed.send_modify(|generation| *generation += 1);
        Ok(session.token)
    }

    async fn perform_login(&self) -> Result<SessionData, ApiError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let api_key = obfuscate_api_key(self.credentials.api_key(), &timestamp)?;
        let body = LoginRequest {
            username: self.credentials.username(),
            password: self.credentials.password(),
            api_key,
            timestamp,
        };

        info!(username = %self.credentials.username(), "Logging in");
        let response = self
            .http
            .post(self.auth_url())
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;

        if !status.is_success() {
            warn!(status = %status, "Login rejected");
            return Err(AuthError::from_status(status, &text).into());
        }

        let token = parse_session_cookie(&headers).ok_or(AuthError::MissingSessionCookie)?;
        let parsed: LoginResponse = if text.trim().is_empty() {
            LoginResponse::default()
        } else {
            serde_json::from_str(&text).map_err(|source| ApiError::Decode {
                endpoint: AUTH_PATH.to_string(),
                source,
            })?
        };

        let session = SessionData::new(token, parsed.auth_type, parsed.password_expiry_time);
        info!(
            auth_type = %session.auth_type,
            timeout_secs = session.timeout(&self.timings).num_seconds(),
            "Session established"
        );
        Ok(session)
    }

    /// Delete the remote session. Best effort: failures are logged, not returned.
    pub async fn logout(&self) {
        let token = self.state.lock().session.take().map(|s| s.token);
        let Some(token) = token else {
            debug!("Logout without an active session");
            return;
        };

        let result = self
            .http
            .delete(self.auth_url())
            .header(header::COOKIE, session_cookie(&token))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => info!("Logged out"),
            Ok(response) => warn!(status = %response.status(), "Logout returned an error status"),
            Err(e) => warn!(error = %e, "Logout request failed"),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state
            .lock()
            .session
            .as_ref()
            .map(|s| !s.is_expired_with(&self.timings))
            .unwrap_or(false)
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.state.lock().session.as_ref().map(|s| SessionInfo {
            auth_type: s.auth_type.clone(),
            refreshed_at: s.refreshed_at,
            minutes_until_expiry: s.minutes_until_expiry(&self.timings),
        })
    }

    /// Time until the current session is due for refresh, zero when overdue,
    /// `None` when there is no session.
    fn time_until_refresh(&self) -> Option<StdDuration> {
        self.state.lock().session.as_ref().map(|s| {
            s.time_until_refresh(&self.timings)
                .to_std()
                .unwrap_or(StdDuration::ZERO)
        })
    }

    fn auth_url(&self) -> String {
        format!("{}{}", self.base_url, AUTH_PATH)
    }

    /// Start the proactive refresher. It wakes when a refresh falls due or a
    /// new session is installed, and exits once `shutdown` fires.
    pub fn spawn_refresher(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut installed = self.installed.subscribe();

        tokio::spawn(async move {
            debug!("Session refresher started");
            loop {
                let due = manager.time_until_refresh();
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = installed.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = sleep_until_due(due) => {
                        debug!("Proactive session refresh");
                        let outcome = tokio::select! {
                            _ = shutdown.cancelled() => break,
                            outcome = manager.ensure_valid() => outcome,
                        };
                        if let Err(e) = outcome {
                            warn!(error = %e, "Proactive session refresh failed");
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(BACKGROUND_RETRY_DELAY) => {}
                            }
                        }
                    }
                }
            }
            debug!("Session refresher stopped");
        })
    }
}

async fn sleep_until_due(due: Option<StdDuration>) {
    match due {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

/// `Cookie` header value carrying a session token.
pub fn session_cookie(token: &str) -> String {
    format!("{}={}", SESSION_COOKIE, token)
}
