//! Shared helpers: a mock identity provider and request builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, header};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dashboard_sso::auth::clock::SharedClock;
use dashboard_sso::auth::{AuthorizationPolicy, OidcProvider};
use dashboard_sso::config::OidcConfig;

pub const HOST: &str = "dash.test";
pub const CLIENT_ID: &str = "dashboard";

const SIGNING_KEY_K1: &[u8] = include_bytes!("../fixtures/signing_key_k1.pem");
const JWKS_K1: &str = include_str!("../fixtures/jwks_k1.json");

/// Start a mock provider publishing discovery and the `k1` key set.
pub async fn start_idp() -> MockServer {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": base,
            "authorization_endpoint": format!("{base}/auth"),
            "token_endpoint": format!("{base}/token"),
            "end_session_endpoint": format!("{base}/logout"),
            "jwks_uri": format!("{base}/certs"),
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/certs"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::from_str::<Value>(JWKS_K1).unwrap()),
        )
        .mount(&server)
        .await;
    server
}

/// Sign `claims` with the `k1` test key.
pub fn mint_id_token(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("k1".to_string());
    let key = EncodingKey::from_rsa_pem(SIGNING_KEY_K1).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

/// Claims for `alice` with the given realm roles, issued by `issuer`.
pub fn alice_claims(issuer: &str, roles: &[&str]) -> Value {
    let now = chrono::Utc::now().timestamp();
    json!({
        "iss": issuer,
        "sub": "8d3c6a3e-alice",
        "aud": CLIENT_ID,
        "iat": now,
        "exp": now + 3600,
        "preferred_username": "alice",
        "realm_access": { "roles": roles },
    })
}

/// Answer the code grant with `id_token`.
pub async fn mount_code_grant(server: &MockServer, id_token: &str, expires_in: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "id_token": id_token,
            "refresh_token": "refresh-1",
            "expires_in": expires_in,
            "token_type": "Bearer",
        })))
        .mount(server)
        .await;
}

/// Provider wired to the mock server.
pub fn oidc_provider(server: &MockServer, policy: AuthorizationPolicy, clock: SharedClock) -> Arc<OidcProvider> {
    oidc_provider_with_timeout(server, policy, clock, OidcConfig::default().http_timeout)
}

/// Provider wired to the mock server with a custom outbound deadline.
pub fn oidc_provider_with_timeout(
    server: &MockServer,
    policy: AuthorizationPolicy,
    clock: SharedClock,
    http_timeout: Duration,
) -> Arc<OidcProvider> {
    let config = OidcConfig {
        issuer: server.uri(),
        client_id: CLIENT_ID.to_string(),
        http_timeout,
        ..OidcConfig::default()
    };
    Arc::new(OidcProvider::from_config(&config, policy, clock).unwrap())
}

/// GET `uri` as a browser on [`HOST`], optionally with a cookie.
pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri).header(header::HOST, HOST);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

/// The `Location` header.
pub fn location<B>(response: &Response<B>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("no Location header")
        .to_str()
        .unwrap()
        .to_string()
}

/// Query parameters of a URL.
pub fn query_of(url: &str) -> HashMap<String, String> {
    url::Url::parse(url).unwrap().query_pairs().into_owned().collect()
}

/// `name=value` of the first `Set-Cookie`, if any.
pub fn set_cookie<B>(response: &Response<B>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_string())
}

/// Just the `name=value` pair of a `Set-Cookie` value.
pub fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().trim().to_string()
}

/// Read the body as JSON.
pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Read the body as text.
pub async fn text_body(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
