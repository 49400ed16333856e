//! In-memory response caching.
//!
//! This module provides the `ResponseCache` the transport consults before
//! sending a GET. Entries expire after a TTL or an idle window, and writes
//! invalidate every cached read under the written path.

pub mod store;

pub use store::{CachedResponse, ResponseCache};
