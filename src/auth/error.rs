//! Authentication error taxonomy and its HTTP mapping.
//!
//! Every variant renders a fixed, generic body. The detail carried inside a
//! variant is for logs only: a caller probing the callback must not learn
//! whether the signature, the issuer or the key id was the problem.

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use super::jwks::KeyError;

/// `WWW-Authenticate` challenge sent by the basic provider.
pub const BASIC_CHALLENGE: &str = r#"Basic realm="Dashboard""#;

/// Failures along the login, callback, session and basic-auth paths.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Provider metadata could not be fetched or parsed.
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    /// The anti-forgery state is unknown, already used, or older than the window.
    #[error("invalid or expired state")]
    StateInvalidOrExpired,

    /// A required callback query parameter is missing.
    #[error("missing callback parameter: {0}")]
    MissingParameter(&'static str),

    /// The identity provider redirected back with an `error` parameter.
    #[error("identity provider rejected the login: {0}")]
    ProviderRejected(String),

    /// Code or refresh grant failed, or returned a non-success status.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// Identity token signature, issuer, key or structure check failed.
    #[error("identity token verification failed: {0}")]
    TokenVerification(String),

    /// The verified identity is not on any allow-list.
    #[error("access denied for {0}")]
    AuthorizationDenied(String),

    /// The session's access expiry has passed. Handled by the gate via a
    /// refresh attempt; never rendered to a caller.
    #[error("session expired")]
    SessionExpired,

    /// Missing or wrong basic-auth credentials.
    #[error("unauthenticated")]
    Unauthenticated,
}

impl From<KeyError> for AuthError {
    fn from(err: KeyError) -> Self {
        Self::TokenVerification(err.to_string())
    }
}

impl AuthError {
    /// HTTP status this error is surfaced as.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::StateInvalidOrExpired | Self::MissingParameter(_) => StatusCode::BAD_REQUEST,
            Self::ProviderRejected(_) | Self::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
            Self::Unauthenticated | Self::SessionExpired => StatusCode::UNAUTHORIZED,
            Self::Discovery(_) | Self::TokenExchange(_) | Self::TokenVerification(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "OIDC discovery failed",
            Self::StateInvalidOrExpired => "Invalid or expired state",
            Self::MissingParameter(_) => "Missing code or state",
            Self::ProviderRejected(_) => "Login was rejected by the identity provider",
            Self::TokenExchange(_) => "Token exchange failed",
            Self::TokenVerification(_) => "Failed to verify ID token",
            Self::AuthorizationDenied(_) => "Access denied",
            Self::SessionExpired | Self::Unauthenticated => "Unauthorized",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.public_message();
        if matches!(self, Self::Unauthenticated) {
            return (status, [(header::WWW_AUTHENTICATE, BASIC_CHALLENGE)], body).into_response();
        }
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_status_codes() {
        assert_eq!(AuthError::Discovery("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AuthError::StateInvalidOrExpired.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::TokenExchange("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            AuthError::TokenVerification("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AuthError::AuthorizationDenied("bob".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn verification_response_does_not_leak_cause() {
        // GIVEN: a verification failure with a specific internal cause
        let err = AuthError::TokenVerification("issuer mismatch: https://evil".into());

        // THEN: the public message is generic
        assert_eq!(err.public_message(), "Failed to verify ID token");
    }

    #[test]
    fn unauthenticated_carries_basic_challenge() {
        let response = AuthError::Unauthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            BASIC_CHALLENGE
        );
    }
}
