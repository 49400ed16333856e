//! API client and its request pipeline.

pub mod client;
pub mod error;
pub mod pagination;
pub mod rate_limit;
pub mod request;
pub mod retry;
pub mod transport;
pub mod typed;

pub use client::ApiClient;
pub use error::{ApiError, AuthError};
pub use pagination::PAGE_SIZE;
pub use rate_limit::{MethodClass, RateLimiter};
pub use request::{with_query, ApiRequest, ApiResponse};
pub use retry::RetryPolicy;
pub use typed::CreateResponse;
