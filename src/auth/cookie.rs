//! Session cookie and request-origin helpers.
//!
//! The dashboard usually sits behind a TLS-terminating proxy, so the scheme
//! and host the browser used are read from `X-Forwarded-Proto` and
//! `X-Forwarded-Host` before falling back to what the server itself saw.

use axum::http::{HeaderMap, Uri, header};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "altcha_session";

/// Cookie lifetime in seconds. Fixed; independent of the access token expiry.
pub const SESSION_COOKIE_MAX_AGE: i64 = 86_400;

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Build the session cookie carrying `session_id`.
#[must_use]
pub fn session_cookie(session_id: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::seconds(SESSION_COOKIE_MAX_AGE))
        .build()
}

/// A cookie that, once added to a jar, expires the session cookie.
#[must_use]
pub fn cleared_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::ZERO)
        .build()
}

/// Session id from the request's cookies, if any.
#[must_use]
pub fn session_id(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn first_forwarded(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

/// `https` when the connection or the proxy says so, `http` otherwise.
/// Any other forwarded value is ignored.
#[must_use]
pub fn request_scheme(headers: &HeaderMap, uri: &Uri) -> String {
    let forwarded = first_forwarded(headers, X_FORWARDED_PROTO);
    if uri.scheme_str() == Some("https") || forwarded.as_deref() == Some("https") {
        "https".to_string()
    } else {
        "http".to_string()
    }
}

/// Host the browser addressed: `X-Forwarded-Host`, then `Host`, then the
/// request URI's authority.
#[must_use]
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> String {
    headers
        .get(X_FORWARDED_HOST)
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .or_else(|| uri.authority().map(ToString::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}

/// `{scheme}://{host}` as seen by the browser.
#[must_use]
pub fn request_origin(headers: &HeaderMap, uri: &Uri) -> String {
    format!("{}://{}", request_scheme(headers, uri), request_host(headers, uri))
}

/// Whether the session cookie should carry `Secure`.
#[must_use]
pub fn is_secure(headers: &HeaderMap, uri: &Uri) -> bool {
    request_scheme(headers, uri) == "https"
}
