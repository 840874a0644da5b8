//! HTTP Basic provider: one configured username and password.
//!
//! No sessions, cookies or redirects. Every request carries credentials; the
//! gate compares them in constant time and then applies the allow-list.

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::error::BASIC_CHALLENGE;
use super::{AuthError, AuthProvider, AuthorizationPolicy, Identity};
use crate::config::BasicConfig;
use crate::{Error, Result};

const LOGGED_OUT: &str = "Logged out. Close this tab or re-enter credentials.";

/// Static-credential provider.
pub struct BasicProvider {
    username: String,
    password: String,
    policy: AuthorizationPolicy,
}

impl std::fmt::Debug for BasicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicProvider")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl BasicProvider {
    /// Create a provider with explicit credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>, policy: AuthorizationPolicy) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            policy,
        }
    }

    /// Create a provider from configuration, resolving `env:` secrets.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the username is empty or the password cannot be
    /// resolved to a non-empty value.
    pub fn from_config(config: &BasicConfig, policy: AuthorizationPolicy) -> Result<Self> {
        if config.username.is_empty() {
            return Err(Error::Config("auth.basic.username is required".to_string()));
        }
        let password = config.resolve_password()?;
        Ok(Self::new(config.username.clone(), password, policy))
    }

    /// Check a request's credentials.
    ///
    /// # Errors
    ///
    /// [`AuthError::Unauthenticated`] for missing or wrong credentials,
    /// [`AuthError::AuthorizationDenied`] when the allow-list rejects the user.
    pub fn check(&self, headers: &HeaderMap) -> std::result::Result<Identity, AuthError> {
        let (user, pass) = parse_basic(headers).ok_or(AuthError::Unauthenticated)?;

        let user_ok = digest_eq(&user, &self.username);
        let pass_ok = digest_eq(&pass, &self.password);
        if !bool::from(user_ok & pass_ok) {
            warn!("Basic auth rejected: invalid credentials");
            return Err(AuthError::Unauthenticated);
        }

        let identity = Identity::named(user);
        if !self.policy.authorize(&identity) {
            warn!(username = %identity.username, "Basic auth user not in allow-list");
            return Err(AuthError::AuthorizationDenied(identity.username));
        }
        Ok(identity)
    }
}

/// Compare SHA-256 digests in constant time so neither content nor length
/// of the configured value leaks through timing.
fn digest_eq(given: &str, expected: &str) -> subtle::Choice {
    let given = Sha256::digest(given.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    given.as_slice().ct_eq(expected.as_slice())
}

fn parse_basic(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

async fn logout() -> Response {
    debug!("Basic auth logout, re-challenging");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, BASIC_CHALLENGE)],
        LOGGED_OUT,
    )
        .into_response()
}

#[async_trait::async_trait]
impl AuthProvider for BasicProvider {
    fn name(&self) -> &'static str {
        "basic"
    }

    async fn authenticate(&self, headers: &HeaderMap, _uri: &Uri) -> std::result::Result<Identity, Response> {
        self.check(headers).map_err(IntoResponse::into_response)
    }

    fn routes(self: Arc<Self>) -> Router {
        Router::new().route("/auth/logout", get(logout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn provider(policy: AuthorizationPolicy) -> BasicProvider {
        BasicProvider::new("admin", "hunter2", policy)
    }

    fn with_credentials(user: &str, pass: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let encoded = STANDARD.encode(format!("{user}:{pass}"));
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        headers
    }

    #[test]
    fn correct_credentials_yield_identity() {
        let identity = provider(AuthorizationPolicy::default())
            .check(&with_credentials("admin", "hunter2"))
            .unwrap();
        assert_eq!(identity, Identity::named("admin"));
    }

    #[test]
    fn rejected_attempt_does_not_log_submitted_username() {
        use std::io::Write;
        use std::sync::{Arc, Mutex};

        #[derive(Clone, Default)]
        struct Captured(Arc<Mutex<Vec<u8>>>);

        impl Write for Captured {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        // GIVEN: a subscriber capturing log output
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        // WHEN: a password is typed into the username field
        tracing::subscriber::with_default(subscriber, || {
            let result = provider(AuthorizationPolicy::default()).check(&with_credentials("hunter2", "oops"));
            assert!(matches!(result, Err(AuthError::Unauthenticated)));
        });

        // THEN: the rejection is logged without what was submitted
        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Basic auth rejected"));
        assert!(!logs.contains("hunter2"));
    }

    #[test]
    fn wrong_password_is_unauthenticated() {
        let result = provider(AuthorizationPolicy::default()).check(&with_credentials("admin", "hunter3"));
        assert!(matches!(result, Err(AuthError::Unauthenticated)));
    }

    #[test]
    fn missing_header_is_unauthenticated() {
        let result = provider(AuthorizationPolicy::default()).check(&HeaderMap::new());
        assert!(matches!(result, Err(AuthError::Unauthenticated)));
    }

    #[test]
    fn bearer_scheme_is_not_basic() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(parse_basic(&headers).is_none());
    }

    #[test]
    fn password_may_contain_colons() {
        let p = BasicProvider::new("admin", "a:b:c", AuthorizationPolicy::default());
        assert!(p.check(&with_credentials("admin", "a:b:c")).is_ok());
    }

    #[test]
    fn allow_list_denial_is_forbidden() {
        // GIVEN: credentials are right but only "root" is allowed
        let policy = AuthorizationPolicy::new(vec!["root".to_string()], vec![], vec![]);

        // WHEN: admin logs in
        let result = provider(policy).check(&with_credentials("admin", "hunter2"));

        // THEN: 403, not 401
        let err = result.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn logout_rechallenges() {
        let response = logout().await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            BASIC_CHALLENGE
        );
    }
}
