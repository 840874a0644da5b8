//! OpenID Connect provider: authorization code flow with PKCE.
//!
//! # Login state machine
//!
//! ```text
//! Unauthenticated ──redirect──▶ PendingCallback ──callback ok──▶ Authenticated
//!        ▲                            │                            │      ▲
//!        │                     bad state / denied          access expired │
//!        │                            ▼                            ▼      │
//!        └──────────────────── error response            Refreshing ──ok──┘
//!        └───────────────────────────────────────────────── refresh failed
//! ```
//!
//! - **Gate**: a valid session cookie passes with its identity attached. An
//!   access-expired session with a refresh token is renewed in place; without
//!   one, or if renewal fails, the session is deleted and the browser is sent
//!   to log in again. Renewal holds the session's refresh gate, so parallel
//!   requests spend the refresh token once and share the result.
//! - **Login**: discovery is resolved first, then a pending login is created
//!   and the browser is redirected (302) to the authorization endpoint with
//!   the S256 challenge and state.
//! - **Callback** (`/auth/callback`): consume state, exchange code, verify the
//!   identity token, apply the allow-list, create a session, set the cookie,
//!   redirect to `/`. Nothing is created if any step fails.
//! - **Logout** (`/auth/logout`): delete the session, expire the cookie, and
//!   redirect to the provider's end-session endpoint when it has one.
//!
//! The two sweepers are started in the constructor and stopped by
//! [`AuthProvider::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use super::clock::SharedClock;
use super::cookie;
use super::discovery::DiscoveryResolver;
use super::exchange::TokenClient;
use super::jwks::SigningKeyCache;
use super::pending::{self, PendingLoginStore};
use super::pkce;
use super::session::{self, Session, SessionStore};
use super::verifier::TokenVerifier;
use super::{AuthError, AuthProvider, AuthorizationPolicy, Identity};
use crate::config::OidcConfig;
use crate::{Error, Result};

/// Path the identity provider redirects back to.
pub const CALLBACK_PATH: &str = "/auth/callback";

/// Path that ends the session.
pub const LOGOUT_PATH: &str = "/auth/logout";

const SCOPE: &str = "openid profile";

/// Build the outbound HTTP client. Every call to the identity provider is
/// bounded by `timeout`.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// OIDC authentication provider.
pub struct OidcProvider {
    discovery: Arc<DiscoveryResolver>,
    verifier: TokenVerifier,
    pending: Arc<PendingLoginStore>,
    sessions: Arc<SessionStore>,
    tokens: TokenClient,
    policy: AuthorizationPolicy,
    clock: SharedClock,
    shutdown_tx: broadcast::Sender<()>,
}

impl OidcProvider {
    /// Build the provider and start its sweepers.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if issuer or client id is missing or the client
    /// secret reference cannot be resolved; [`Error::Http`] if the HTTP client
    /// cannot be built.
    pub fn from_config(config: &OidcConfig, policy: AuthorizationPolicy, clock: SharedClock) -> Result<Self> {
        if config.issuer.is_empty() {
            return Err(Error::Config("auth.oidc.issuer is required".to_string()));
        }
        if config.client_id.is_empty() {
            return Err(Error::Config("auth.oidc.client_id is required".to_string()));
        }
        if !config.pkce {
            warn!("auth.oidc.pkce is false; ignored, PKCE is always used");
        }
        if !config.issuer.starts_with("https://") {
            warn!(issuer = %config.issuer, "OIDC issuer is not https");
        }

        let client_secret = config.resolve_client_secret()?;
        let http = http_client(config.http_timeout)?;

        let discovery = Arc::new(DiscoveryResolver::new(
            http.clone(),
            config.issuer.clone(),
            config.overrides(),
        ));
        let keys = Arc::new(SigningKeyCache::new(http.clone(), Arc::clone(&discovery)));
        let pending = Arc::new(PendingLoginStore::new(Arc::clone(&clock)));
        let sessions = Arc::new(SessionStore::new(Arc::clone(&clock)));

        let (shutdown_tx, _) = broadcast::channel(1);
        pending::spawn_sweeper(
            Arc::clone(&pending),
            config.pending_sweep_interval,
            shutdown_tx.subscribe(),
        );
        session::spawn_sweeper(
            Arc::clone(&sessions),
            config.session_sweep_interval,
            shutdown_tx.subscribe(),
        );

        Ok(Self {
            discovery,
            verifier: TokenVerifier::new(keys),
            pending,
            sessions,
            tokens: TokenClient::new(http, config.client_id.clone(), client_secret),
            policy,
            clock,
            shutdown_tx,
        })
    }

    /// The session store.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The pending-login store.
    #[must_use]
    pub fn pending(&self) -> &PendingLoginStore {
        &self.pending
    }

    /// The discovery resolver.
    #[must_use]
    pub fn discovery(&self) -> &DiscoveryResolver {
        &self.discovery
    }

    /// Start a login: 302 to the authorization endpoint.
    async fn start_login(&self, headers: &HeaderMap, uri: &Uri) -> std::result::Result<Response, AuthError> {
        let doc = self.discovery.resolve().await?;
        let mut target = Url::parse(&doc.authorization_endpoint)
            .map_err(|e| AuthError::Discovery(format!("invalid authorization_endpoint: {e}")))?;

        let (state, verifier) = self.pending.create();
        let redirect_uri = callback_url(headers, uri);
        target
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", self.tokens.client_id())
            .append_pair("redirect_uri", &redirect_uri)
            .append_pair("scope", SCOPE)
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce::code_challenge(&verifier))
            .append_pair("code_challenge_method", "S256");

        debug!(path = %uri.path(), "Redirecting to identity provider");
        Ok(found(target.as_str()))
    }

    /// Renew an access-expired session with its refresh token.
    async fn refresh(&self, session_id: &str, session: &Session) -> std::result::Result<(), AuthError> {
        let refresh_token = session.refresh_token.as_deref().ok_or(AuthError::SessionExpired)?;
        let doc = self.discovery.resolve().await?;
        let tokens = self.tokens.refresh(&doc.token_endpoint, refresh_token).await?;
        let ttl = tokens.ttl();
        if !self
            .sessions
            .update_tokens(session_id, tokens.access_token, tokens.refresh_token, ttl)
        {
            return Err(AuthError::SessionExpired);
        }
        debug!(username = %session.identity.username, "Session refreshed");
        Ok(())
    }

    /// Bring an access-expired session back to life, one refresh per session
    /// at a time. Requests that queued behind a successful refresh reuse its
    /// result instead of spending the refresh token again.
    ///
    /// Returns `None` after deleting the session when it cannot be renewed.
    async fn renew(&self, session_id: &str, stale: &Session) -> Option<Identity> {
        let _gate = stale.refresh_gate().lock().await;

        let current = self.sessions.get(session_id)?;
        if !current.is_access_expired(self.clock.now()) {
            debug!(username = %current.identity.username, "Session already refreshed by a concurrent request");
            return Some(Identity::clone(&current.identity));
        }

        match self.refresh(session_id, &current).await {
            Ok(()) => Some(Identity::clone(&current.identity)),
            Err(e) => {
                warn!(username = %current.identity.username, error = %e, "Session renewal failed, re-authenticating");
                self.sessions.delete(session_id);
                None
            }
        }
    }

    /// Callback steps after the state has been consumed.
    async fn complete_login(
        &self,
        code: &str,
        verifier: &str,
        headers: &HeaderMap,
        uri: &Uri,
    ) -> std::result::Result<String, AuthError> {
        let doc = self.discovery.resolve().await?;
        let tokens = self
            .tokens
            .exchange_code(&doc.token_endpoint, code, &callback_url(headers, uri), verifier)
            .await?;

        let id_token = tokens.id_token.as_deref().unwrap_or_default();
        let identity = self.verifier.verify(id_token, self.discovery.issuer()).await?;

        if !self.policy.authorize(&identity) {
            return Err(AuthError::AuthorizationDenied(identity.username));
        }

        let username = identity.username.clone();
        let ttl = tokens.ttl();
        let session_id = self
            .sessions
            .create(identity, tokens.access_token, tokens.refresh_token, ttl);
        info!(username = %username, "Login complete, session created");
        Ok(session_id)
    }
}

#[async_trait::async_trait]
impl AuthProvider for OidcProvider {
    fn name(&self) -> &'static str {
        "oidc"
    }

    async fn authenticate(&self, headers: &HeaderMap, uri: &Uri) -> std::result::Result<Identity, Response> {
        if let Some(session_id) = cookie::session_id(headers)
            && let Some(session) = self.sessions.get(&session_id)
        {
            if !session.is_access_expired(self.clock.now()) {
                return Ok(Identity::clone(&session.identity));
            }
            if let Some(identity) = self.renew(&session_id, &session).await {
                return Ok(identity);
            }
        }

        match self.start_login(headers, uri).await {
            Ok(redirect) => Err(redirect),
            Err(e) => {
                warn!(error = %e, "Cannot start login");
                Err(e.into_response())
            }
        }
    }

    fn routes(self: Arc<Self>) -> Router {
        Router::new()
            .route(CALLBACK_PATH, get(callback))
            .route(LOGOUT_PATH, get(logout))
            .with_state(self)
    }

    fn shutdown(&self) {
        // No receivers left just means the sweepers already stopped
        let _ = self.shutdown_tx.send(());
    }
}

/// Query parameters on the provider's redirect back to us.
#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn callback(
    State(provider): State<Arc<OidcProvider>>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
    uri: Uri,
    jar: CookieJar,
) -> std::result::Result<(CookieJar, Response), AuthError> {
    let result = handle_callback(&provider, params, &headers, &uri).await;
    match result {
        Ok(session_id) => {
            let secure = cookie::is_secure(&headers, &uri);
            Ok((jar.add(cookie::session_cookie(session_id, secure)), found("/")))
        }
        Err(e) => {
            warn!(error = %e, "Login callback rejected");
            Err(e)
        }
    }
}

async fn handle_callback(
    provider: &OidcProvider,
    params: CallbackParams,
    headers: &HeaderMap,
    uri: &Uri,
) -> std::result::Result<String, AuthError> {
    let state = params
        .state
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::MissingParameter("state"))?;
    let verifier = provider.pending.consume(&state)?;

    if let Some(error) = params.error {
        let detail = params.error_description.unwrap_or_default();
        return Err(AuthError::ProviderRejected(format!("{error}: {detail}")));
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(AuthError::MissingParameter("code"))?;

    provider.complete_login(&code, &verifier, headers, uri).await
}

async fn logout(
    State(provider): State<Arc<OidcProvider>>,
    headers: HeaderMap,
    uri: Uri,
    jar: CookieJar,
) -> (CookieJar, Response) {
    if let Some(session_id) = cookie::session_id(&headers)
        && provider.sessions.delete(&session_id)
    {
        info!("Session ended by logout");
    }

    let jar = jar.add(cookie::cleared_cookie(cookie::is_secure(&headers, &uri)));

    let end_session = provider
        .discovery
        .resolve()
        .await
        .ok()
        .and_then(|doc| doc.end_session_endpoint.clone());

    let Some(endpoint) = end_session else {
        return (jar, found("/"));
    };
    match Url::parse(&endpoint) {
        Ok(mut target) => {
            let return_to = format!("{}/", cookie::request_origin(&headers, &uri));
            target
                .query_pairs_mut()
                .append_pair("client_id", provider.tokens.client_id())
                .append_pair("post_logout_redirect_uri", &return_to);
            (jar, found(target.as_str()))
        }
        Err(e) => {
            warn!(error = %e, "Invalid end_session_endpoint, redirecting home");
            (jar, found("/"))
        }
    }
}

fn callback_url(headers: &HeaderMap, uri: &Uri) -> String {
    format!("{}{CALLBACK_PATH}", cookie::request_origin(headers, uri))
}

/// 302 Found with a `Location` header.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn callback_url_follows_forwarded_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        headers.insert(header::HOST, HeaderValue::from_static("dash.example.com"));
        let uri: Uri = "/api/me".parse().unwrap();

        assert_eq!(callback_url(&headers, &uri), "https://dash.example.com/auth/callback");
    }

    #[test]
    fn found_is_302_with_location() {
        let response = found("/");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/");
    }

    #[tokio::test]
    async fn missing_issuer_is_config_error() {
        let result = OidcProvider::from_config(
            &OidcConfig::default(),
            AuthorizationPolicy::default(),
            crate::auth::clock::system(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
