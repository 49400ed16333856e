use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;

/// Name of the cookie the service delivers the session token in.
pub const SESSION_COOKIE: &str = "JSESSIONID";

/// Expiry hints at or below this value mean "no expiry information".
const NO_EXPIRY_HINT: i64 = 0;

/// Earliest point after login at which a refresh may fall due.
const MIN_REFRESH_AFTER_SECS: i64 = 1;

/// A server-issued session. Replaced whole on every refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub token: String,
    pub auth_type: String,
    /// Seconds until the password (and with it the session) expires, or a
    /// value `<= 0` when the service did not say.
    pub password_expiry_secs: i64,
    pub refreshed_at: DateTime<Utc>,
}

/// Timeout arithmetic shared by the request path and the background refresher.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    pub default_timeout: Duration,
    pub refresh_offset: Duration,
}

impl SessionTimings {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            default_timeout: Duration::seconds(config.default_timeout_secs as i64),
            refresh_offset: Duration::seconds(config.refresh_offset_secs as i64),
        }
    }
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl SessionData {
    pub fn new(token: String, auth_type: String, password_expiry_secs: i64) -> Self {
        Self {
            token,
            auth_type,
            password_expiry_secs,
            refreshed_at: Utc::now(),
        }
    }

    /// Session lifetime: the expiry hint when present, otherwise the default.
    pub fn timeout(&self, timings: &SessionTimings) -> Duration {
        if self.password_expiry_secs > NO_EXPIRY_HINT {
            Duration::seconds(self.password_expiry_secs)
        } else {
            timings.default_timeout
        }
    }

    /// Time after `refreshed_at` at which a proactive refresh is due.
    ///
    /// Never earlier than half the session lifetime, so a short-lived session
    /// is still used for a while before it is replaced.
    fn refresh_after(&self, timings: &SessionTimings) -> Duration {
        let timeout = self.timeout(timings);
        (timeout - timings.refresh_offset)
            .max(timeout / 2)
            .max(Duration::seconds(MIN_REFRESH_AFTER_SECS))
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_with(&SessionTimings::default())
    }

    pub fn is_expired_with(&self, timings: &SessionTimings) -> bool {
        Utc::now() >= self.refreshed_at + self.timeout(timings)
    }

    /// Check if the session is close enough to expiry that it should be refreshed
    pub fn needs_refresh(&self, timings: &SessionTimings) -> bool {
        Utc::now() - self.refreshed_at >= self.refresh_after(timings)
    }

    /// How long until a refresh is due; negative once it is overdue.
    pub fn time_until_refresh(&self, timings: &SessionTimings) -> Duration {
        self.refreshed_at + self.refresh_after(timings) - Utc::now()
    }

    pub fn time_until_expiry(&self, timings: &SessionTimings) -> Duration {
        self.refreshed_at + self.timeout(timings) - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self, timings: &SessionTimings) -> i64 {
        self.time_until_expiry(timings).num_minutes().max(0)
    }
}

fn session_cookie_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r"(?:^|;\s*){}=([^;\s]+)", SESSION_COOKIE))
            .expect("session cookie pattern is a valid regex")
    })
}

/// Pull the session token out of the `Set-Cookie` headers of a login response.
pub fn parse_session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| {
            session_cookie_pattern()
                .captures(cookie)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        })
}
