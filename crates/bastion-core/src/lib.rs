//! Resilient client runtime for a cloud security service's session-based REST API.
//!
//! The crate handles everything between a generated resource wrapper and the
//! wire: logging in with an obfuscated API key, keeping the session alive,
//! rate limiting per HTTP method, retrying throttled and transiently
//! conflicting requests, caching reads, and paging through list endpoints.
//!
//! ```no_run
//! use bastion_core::{ApiClient, ClientConfig};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Location {
//!     id: u64,
//!     name: String,
//! }
//!
//! # async fn run() -> Result<(), bastion_core::ApiError> {
//! let config = ClientConfig::new("admin@example.com", "secret", "abcdefghijklmnop", "zscloud");
//! let client = ApiClient::new(config)?;
//! let locations: Vec<Location> = client.read_all_pages("/locations").await?;
//! for location in &locations {
//!     println!("{} {}", location.id, location.name);
//! }
//! client.logout().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, AuthError, CreateResponse, PAGE_SIZE};
pub use auth::{Credentials, SessionInfo};
pub use config::{CacheConfig, ClientConfig, ConfigError, RateLimitConfig, RetryConfig, SessionConfig};
