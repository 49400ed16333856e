//! Per-method request budgets.
//!
//! The service publishes separate limits for reads, writes and deletes. Each
//! class gets a sliding window of recent request times; a request is admitted
//! while the window holds fewer entries than the class limit.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Method;
use tracing::debug;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClass {
    Read,
    Write,
    Delete,
}

impl MethodClass {
    pub fn of(method: &Method) -> Self {
        match *method {
            Method::DELETE => MethodClass::Delete,
            Method::GET | Method::HEAD | Method::OPTIONS => MethodClass::Read,
            _ => MethodClass::Write,
        }
    }
}

#[derive(Debug)]
struct Budget {
    /// `0` means unlimited.
    limit: usize,
    recent: Mutex<VecDeque<Instant>>,
}

impl Budget {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            recent: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    fn check(&self, window: Duration, record: bool) -> Option<Duration> {
        if self.limit == 0 {
            return None;
        }

        let now = Instant::now();
        let mut recent = self.recent.lock();
        while let Some(&oldest) = recent.front() {
            if now.duration_since(oldest) >= window {
                recent.pop_front();
            } else {
                break;
            }
        }

        if recent.len() < self.limit {
            if record {
                recent.push_back(now);
            }
            return None;
        }

        recent
            .front()
            .map(|&oldest| (oldest + window).saturating_duration_since(now))
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    read: Budget,
    write: Budget,
    delete: Budget,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: Duration::from_millis(config.window_ms),
            read: Budget::new(config.get_limit),
            write: Budget::new(config.write_limit),
            delete: Budget::new(config.delete_limit),
        }
    }

    fn budget(&self, class: MethodClass) -> &Budget {
        match class {
            MethodClass::Read => &self.read,
            MethodClass::Write => &self.write,
            MethodClass::Delete => &self.delete,
        }
    }

    /// Ask to send a request. `None` admits it (and counts it against the
    /// budget); `Some(delay)` means wait that long and ask again.
    pub fn wait(&self, method: &Method) -> Option<Duration> {
        let class = MethodClass::of(method);
        let delay = self.budget(class).check(self.window, true);
        if let Some(d) = delay {
            debug!(?class, delay_ms = d.as_millis() as u64, "Rate limit budget exhausted");
        }
        delay
    }

    /// Like [`wait`](Self::wait) but never counts a request.
    pub fn delay_for(&self, method: &Method) -> Option<Duration> {
        self.budget(MethodClass::of(method)).check(self.window, false)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default())
    }
}
