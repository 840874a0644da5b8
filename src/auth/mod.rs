//! Dashboard authentication.
//!
//! One [`AuthProvider`] is selected at startup from configuration and serves
//! two purposes for the HTTP layer:
//!
//! - a request gate ([`require_auth`]) that either attaches an [`Identity`]
//!   to the request or answers on its behalf (challenge, redirect, denial);
//! - provider-owned routes under `/auth/`.
//!
//! | Provider | Gate | Routes |
//! |----------|------|--------|
//! | [`BasicProvider`] | constant-time credential check + allow-list | `/auth/logout` |
//! | [`OidcProvider`] | session cookie, silent refresh, login redirect | `/auth/callback`, `/auth/logout` |

pub mod basic;
pub mod clock;
pub mod cookie;
pub mod discovery;
pub mod error;
pub mod exchange;
pub mod jwks;
pub mod oidc;
pub mod pending;
pub mod pkce;
pub mod policy;
pub mod session;
pub mod verifier;

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    Router,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, Uri, request::Parts},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use tracing::info;

pub use basic::BasicProvider;
pub use error::AuthError;
pub use oidc::OidcProvider;
pub use policy::AuthorizationPolicy;

use crate::config::{AuthConfig, ProviderKind};
use crate::{Error, Result};

/// Who is making the request, as established by the active provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Login name.
    pub username: String,
    /// Provider realm roles. Empty for the basic provider.
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Provider groups. Empty for the basic provider.
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

impl Identity {
    /// An identity with a username and nothing else.
    #[must_use]
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            roles: BTreeSet::new(),
            groups: BTreeSet::new(),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or(AuthError::Unauthenticated)
    }
}

/// An authentication strategy for the dashboard.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Establish who is calling, or produce the response that should be sent
    /// instead (401 challenge, redirect to the identity provider, 403, 500).
    async fn authenticate(&self, headers: &HeaderMap, uri: &Uri) -> std::result::Result<Identity, Response>;

    /// Routes owned by the provider, mounted next to the protected routes.
    fn routes(self: Arc<Self>) -> Router;

    /// Stop background work. Called once on server shutdown.
    fn shutdown(&self) {}
}

/// Gate middleware: runs the provider and attaches the [`Identity`].
pub async fn require_auth(
    State(provider): State<Arc<dyn AuthProvider>>,
    mut request: Request,
    next: Next,
) -> Response {
    match provider.authenticate(request.headers(), request.uri()).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(response) => response,
    }
}

/// Build the provider named in configuration.
///
/// Spawns the OIDC provider's sweeper tasks, so this must run inside a
/// Tokio runtime.
///
/// # Errors
///
/// [`Error::Config`] when no provider is selected, or when the selected
/// provider's settings or secrets cannot be resolved.
pub fn build_provider(config: &AuthConfig) -> Result<Arc<dyn AuthProvider>> {
    let policy = config.policy();
    if policy.is_open() {
        info!("No allow-lists configured, every authenticated user is allowed");
    }

    match config.provider {
        Some(ProviderKind::Basic) => {
            let provider = BasicProvider::from_config(&config.basic, policy)?;
            info!(provider = provider.name(), "Authentication provider ready");
            Ok(Arc::new(provider))
        }
        Some(ProviderKind::Oidc) => {
            let provider = OidcProvider::from_config(&config.oidc, policy, clock::system())?;
            info!(provider = provider.name(), issuer = %config.oidc.issuer, "Authentication provider ready");
            Ok(Arc::new(provider))
        }
        None => Err(Error::Config(
            "no authentication provider configured (set auth.provider to basic or oidc)".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    #[test]
    fn identity_serializes_sets_as_arrays() {
        let identity = Identity {
            username: "alice".into(),
            roles: BTreeSet::from(["admin".to_string()]),
            groups: BTreeSet::new(),
        };
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"username": "alice", "roles": ["admin"], "groups": []})
        );
    }

    #[tokio::test]
    async fn identity_extractor_reads_extension() {
        let mut request = HttpRequest::builder().uri("/").body(()).unwrap();
        request.extensions_mut().insert(Identity::named("alice"));
        let (mut parts, ()) = request.into_parts();

        let identity = Identity::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(identity.username, "alice");
    }

    #[tokio::test]
    async fn identity_extractor_rejects_without_gate() {
        let (mut parts, ()) = HttpRequest::builder().uri("/").body(()).unwrap().into_parts();
        let result = Identity::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(AuthError::Unauthenticated)));
    }

    #[test]
    fn missing_provider_is_config_error() {
        let config = AuthConfig::default();
        assert!(matches!(build_provider(&config), Err(Error::Config(_))));
    }
}
