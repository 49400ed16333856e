use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use tracing::debug;

use crate::api::request::{cache_key_path, ApiResponse};
use crate::config::CacheConfig;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// A successful GET response kept for replay.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub response: ApiResponse,
    pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(response: ApiResponse) -> Self {
        Self {
            response,
            cached_at: Utc::now(),
        }
    }

    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.cached_at).num_seconds().max(0)
    }

    fn weight(key: &str, value: &CachedResponse) -> u32 {
        u32::try_from(key.len() + value.response.body.len()).unwrap_or(u32::MAX)
    }
}

/// Response cache keyed by canonical request, with TTL, idle eviction and
/// a byte budget. Safe to share between concurrent requests.
#[derive(Clone)]
pub struct ResponseCache {
    entries: Cache<String, Arc<CachedResponse>>,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        let mut builder = Cache::builder()
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .time_to_idle(Duration::from_secs(config.idle_secs))
            .weigher(|key: &String, value: &Arc<CachedResponse>| CachedResponse::weight(key, value));
        if config.max_size_mb > 0 {
            builder = builder.max_capacity(config.max_size_mb.saturating_mul(BYTES_PER_MB));
        }
        Self {
            entries: builder.build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<CachedResponse>> {
        let hit = self.entries.get(key);
        match hit {
            Some(ref cached) => debug!(key, age_secs = cached.age_secs(), "Cache hit"),
            None => debug!(key, "Cache miss"),
        }
        hit
    }

    pub fn insert(&self, key: String, response: ApiResponse) {
        self.entries.insert(key, Arc::new(CachedResponse::new(response)));
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.invalidate(key);
    }

    /// Drop every entry whose path is `path` or lies beneath it. Matching is
    /// per path segment, so `/users` does not touch `/usersLite`.
    pub fn invalidate_prefix(&self, path: &str) -> usize {
        let path = path.trim_end_matches('/');
        let nested = format!("{}/", path);
        let stale: Vec<Arc<String>> = self
            .entries
            .iter()
            .map(|(key, _)| key)
            .filter(|key| {
                let entry_path = cache_key_path(key);
                entry_path == path || entry_path.starts_with(&nested)
            })
            .collect();

        for key in &stale {
            self.entries.invalidate(key.as_str());
        }
        if !stale.is_empty() {
            debug!(prefix = path, removed = stale.len(), "Invalidated cached responses");
        }
        stale.len()
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}

// ============================================================================
// Tests
// ============================================================================
