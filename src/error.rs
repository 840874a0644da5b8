//! Error types for the dashboard SSO service

use std::io;

use thiserror::Error;

use crate::auth::AuthError;

/// Result type alias for startup and configuration paths
pub type Result<T> = std::result::Result<T, Error>;

/// Service errors outside the per-request authentication path
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication subsystem error surfaced outside a request
    /// (e.g. the `discover` subcommand)
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_keep_their_message() {
        let err: Error = AuthError::Discovery("connection refused".into()).into();
        assert_eq!(err.to_string(), "OIDC discovery failed: connection refused");
    }

    #[test]
    fn config_error_is_prefixed() {
        assert_eq!(
            Error::Config("auth.provider is required".into()).to_string(),
            "Configuration error: auth.provider is required"
        );
    }
}
