//! OpenID Provider metadata discovery.
//!
//! Fetches `{issuer}/.well-known/openid-configuration` once, lazily, on the
//! first login that needs it, and keeps the result for the life of the
//! process. A failed fetch is not cached: the next request tries again.
//!
//! Any of the four endpoint fields may be pinned in configuration. Pinned
//! values win over whatever the provider publishes, which makes it possible to
//! run against providers whose discovery document is incomplete or points at
//! internal hostnames.

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::AuthError;

/// Endpoint metadata used by the login flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// Where the browser is sent to log in.
    pub authorization_endpoint: String,
    /// Code and refresh grants are posted here.
    pub token_endpoint: String,
    /// RP-initiated logout endpoint, if the provider has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
    /// JSON Web Key Set location.
    pub jwks_uri: String,
    /// Issuer identifier published by the provider.
    pub issuer: String,
}

/// Static endpoint overrides from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointOverrides {
    /// Replaces `authorization_endpoint`.
    pub authorization_endpoint: Option<String>,
    /// Replaces `token_endpoint`.
    pub token_endpoint: Option<String>,
    /// Replaces `end_session_endpoint`.
    pub end_session_endpoint: Option<String>,
    /// Replaces `jwks_uri`.
    pub jwks_uri: Option<String>,
}

/// The provider's document as published; every field optional so that
/// overrides can fill the gaps before we insist on completeness.
#[derive(Debug, Default, Deserialize)]
struct PublishedMetadata {
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default)]
    authorization_endpoint: Option<String>,
    #[serde(default)]
    token_endpoint: Option<String>,
    #[serde(default)]
    end_session_endpoint: Option<String>,
    #[serde(default)]
    jwks_uri: Option<String>,
}

/// Lazily fetches and caches the discovery document.
pub struct DiscoveryResolver {
    http: reqwest::Client,
    issuer: String,
    overrides: EndpointOverrides,
    document: OnceCell<DiscoveryDocument>,
}

impl DiscoveryResolver {
    /// Create a resolver for `issuer`. Nothing is fetched until [`resolve`](Self::resolve).
    #[must_use]
    pub fn new(http: reqwest::Client, issuer: impl Into<String>, overrides: EndpointOverrides) -> Self {
        Self {
            http,
            issuer: issuer.into(),
            overrides,
            document: OnceCell::new(),
        }
    }

    /// The configured issuer URL.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Return the discovery document, fetching it on first use.
    ///
    /// # Errors
    ///
    /// [`AuthError::Discovery`] if the well-known endpoint is unreachable,
    /// answers with a non-success status, returns a malformed body, or leaves
    /// a required endpoint unset after overrides are applied.
    pub async fn resolve(&self) -> Result<&DiscoveryDocument, AuthError> {
        self.document.get_or_try_init(|| self.fetch()).await
    }

    /// The document if it has already been fetched.
    #[must_use]
    pub fn cached(&self) -> Option<&DiscoveryDocument> {
        self.document.get()
    }

    async fn fetch(&self) -> Result<DiscoveryDocument, AuthError> {
        let url = well_known_url(&self.issuer);
        debug!(url = %url, "Fetching OIDC discovery document");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::Discovery(format!("fetch {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::Discovery(format!(
                "{url} returned HTTP {}",
                response.status()
            )));
        }

        let published: PublishedMetadata = response
            .json()
            .await
            .map_err(|e| AuthError::Discovery(format!("decode {url}: {e}")))?;

        let document = self.apply_overrides(published)?;
        info!(
            issuer = %document.issuer,
            authorization_endpoint = %document.authorization_endpoint,
            "OIDC discovery complete"
        );
        Ok(document)
    }

    fn apply_overrides(&self, published: PublishedMetadata) -> Result<DiscoveryDocument, AuthError> {
        let pick = |pinned: &Option<String>, fetched: Option<String>| {
            pinned.clone().or(fetched).filter(|v| !v.is_empty())
        };
        let required = |value: Option<String>, field: &str| {
            value.ok_or_else(|| AuthError::Discovery(format!("{field} is not published and not configured")))
        };

        let o = &self.overrides;
        Ok(DiscoveryDocument {
            authorization_endpoint: required(
                pick(&o.authorization_endpoint, published.authorization_endpoint),
                "authorization_endpoint",
            )?,
            token_endpoint: required(pick(&o.token_endpoint, published.token_endpoint), "token_endpoint")?,
            end_session_endpoint: pick(&o.end_session_endpoint, published.end_session_endpoint),
            jwks_uri: required(pick(&o.jwks_uri, published.jwks_uri), "jwks_uri")?,
            issuer: published
                .issuer
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| self.issuer.clone()),
        })
    }
}

/// `{issuer}/.well-known/openid-configuration`, tolerating a trailing slash.
#[must_use]
pub fn well_known_url(issuer: &str) -> String {
    format!("{}/.well-known/openid-configuration", issuer.trim_end_matches('/'))
}
