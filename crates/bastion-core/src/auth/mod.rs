//! Authentication module for managing sessions and credentials.
//!
//! This module provides:
//! - `Credentials`: Immutable login credentials with redacted `Debug`
//! - `obfuscate_api_key`: Time-salted API key derivation used at login
//! - `SessionData`: Server-issued session token with expiry arithmetic
//! - `SessionManager`: Single-flight login, proactive refresh and logout
//!
//! Sessions expire after the password-expiry hint the service returns, or
//! 30 minutes when it returns none, and are refreshed 5 minutes early.

pub mod credentials;
pub mod manager;
pub mod obfuscate;
pub mod session;

pub use credentials::Credentials;
pub use manager::{SessionInfo, SessionManager};
pub use obfuscate::{obfuscate_api_key, ObfuscateError};
pub use session::{SessionData, SessionTimings};
