//! cdnmirror cloud - object-store access over HTTPS
//!
//! Provides:
//! - An HTTPS transport implementing the core `ITransport` port
//! - API-key login against the identity service, producing account sessions
//! - Filling the account cache for every username in the rule file
//!
//! ## Modules
//!
//! - [`auth`] - identity login and account-cache filling
//! - [`client`] - reqwest-backed transport

pub mod auth;
pub mod client;

use cdnmirror_core::domain::AccountError;
use thiserror::Error;

/// Errors that can occur when talking to the identity service or building
/// the HTTPS client
#[derive(Debug, Error)]
pub enum CloudError {
    /// The credentials were rejected (401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The identity service answered with an unexpected client error
    #[error("Login rejected with HTTP {status}: {message}")]
    LoginRejected { status: u16, message: String },

    /// A server-side error occurred (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The rule file names a username without an API key
    #[error("No API key for {0}")]
    MissingApiKey(String),

    /// A session does not cover a rule's region
    #[error(transparent)]
    Account(#[from] AccountError),
}

impl CloudError {
    /// Maps a non-success status from the identity service
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = body.chars().take(200).collect::<String>();
        match status {
            401 | 403 => CloudError::Unauthorized(message),
            500..=599 => CloudError::ServerError(format!("HTTP {status}: {message}")),
            _ => CloudError::LoginRejected { status, message },
        }
    }
}
