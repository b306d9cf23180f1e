// src/error.rs

//! Unified error handling for the watcher.
//!
//! `AuthError` and `FetchError` are the only kinds that steer the polling
//! state machine. `ExtractionError` and `DeliveryError` are always absorbed
//! where they occur. Everything else funnels into `AppError`.

use std::fmt;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Login failed
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Inbox fetch failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Regex compilation failed
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Why a login attempt did not produce a valid session.
///
/// A wrong password, a changed portal layout and rate limiting all look the
/// same from the response, so they share `Credentials`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The portal answered but did not land in the authenticated area
    #[error("login rejected: {0}")]
    Credentials(String),

    /// Transport failure, unexpected status or unexpected redirect
    #[error("network error during login: {0}")]
    Network(String),

    /// The login page did not carry the anti-forgery token
    #[error("could not extract login token: {0}")]
    Extraction(String),
}

impl AuthError {
    pub fn network(message: impl fmt::Display) -> Self {
        Self::Network(message.to_string())
    }
}

/// Why an inbox fetch failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport failure or timeout; the session may still be fine
    #[error("network error while fetching inbox: {0}")]
    Network(String),

    /// The portal no longer considers the session logged in
    #[error("session expired: {0}")]
    Unauthenticated(String),
}

/// A strategy could not make sense of the page.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("extraction failed in {strategy}: {message}")]
pub struct ExtractionError {
    pub strategy: &'static str,
    pub message: String,
}

impl ExtractionError {
    pub fn new(strategy: &'static str, message: impl fmt::Display) -> Self {
        Self {
            strategy,
            message: message.to_string(),
        }
    }
}

/// A sink could not deliver a record to one recipient.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The send did not finish within the per-recipient timeout
    #[error("delivery timed out after {0}s")]
    Timeout(u64),

    /// The transport failed before the sink answered
    #[error("transport error: {0}")]
    Transport(String),

    /// The sink answered with a refusal
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_converts_into_app_error() {
        let err: AppError = AuthError::Credentials("still on /login".into()).into();
        assert!(matches!(err, AppError::Auth(AuthError::Credentials(_))));
        assert_eq!(err.to_string(), "login rejected: still on /login");
    }

    #[test]
    fn test_selector_error_message() {
        let err = AppError::selector("[[bad", "unexpected token");
        assert_eq!(
            err.to_string(),
            "Invalid selector '[[bad': unexpected token"
        );
    }
}
