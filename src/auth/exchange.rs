//! Token endpoint client: authorization-code and refresh grants.
//!
//! Both grants are form-encoded POSTs. `client_secret` is sent only when one
//! is configured (public clients rely on PKCE alone). Any non-success status
//! is a [`AuthError::TokenExchange`]; the provider's error body is kept in the
//! error for the log, never shown to the browser.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use super::AuthError;

/// What the token endpoint returns.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token for provider APIs.
    pub access_token: String,
    /// Signed identity token. Present on the code grant, usually absent on refresh.
    #[serde(default)]
    pub id_token: Option<String>,
    /// Refresh token; absent when the provider does not rotate it.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// Access lifetime as a `Duration`. Zero when the provider gave none;
    /// the session store turns that into its default.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.expires_in.unwrap_or(0))
    }
}

/// Client credentials plus the HTTP client used for grant requests.
#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: Option<String>,
}

impl std::fmt::Debug for TokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl TokenClient {
    /// Create a client. An empty secret is treated as none.
    #[must_use]
    pub fn new(http: reqwest::Client, client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            http,
            client_id: client_id.into(),
            client_secret: client_secret.filter(|s| !s.is_empty()),
        }
    }

    /// The configured client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Redeem an authorization code.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenExchange`] on transport failure, non-success status,
    /// an undecodable body, or a response without an `id_token`.
    pub async fn exchange_code(
        &self,
        token_endpoint: &str,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ];

        let tokens = self.post(token_endpoint, &params).await?;
        if tokens.id_token.as_deref().is_none_or(str::is_empty) {
            return Err(AuthError::TokenExchange("no id_token in token response".into()));
        }
        Ok(tokens)
    }

    /// Redeem a refresh token.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenExchange`] on transport failure, non-success status,
    /// or an undecodable body.
    pub async fn refresh(&self, token_endpoint: &str, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let params = [("grant_type", "refresh_token"), ("refresh_token", refresh_token)];

        self.post(token_endpoint, &params).await
    }

    async fn post(&self, token_endpoint: &str, params: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let grant = params
            .iter()
            .find_map(|(k, v)| (*k == "grant_type").then_some(*v))
            .unwrap_or_default();

        let mut form: HashMap<&str, &str> = params.iter().copied().collect();
        form.insert("client_id", &self.client_id);
        if let Some(secret) = &self.client_secret {
            form.insert("client_secret", secret);
        }

        let response = self
            .http
            .post(token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchange(format!("{grant} request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenExchange(format!("{grant}: HTTP {status} - {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::TokenExchange(format!("{grant}: failed to parse response: {e}")))
    }
}
