//! Dashboard SSO
//!
//! Single-sign-on gate for the administrative dashboard.
//!
//! # Features
//!
//! - **OIDC**: Authorization Code flow with PKCE (S256) against any OpenID
//!   provider, with lazy discovery and per-endpoint overrides
//! - **Token verification**: RSA-signed identity tokens checked against the
//!   provider's key set, refreshed on unknown key id
//! - **Sessions**: server-side, cookie-referenced, silently refreshed, capped
//!   at 24 hours
//! - **Allow-lists**: users, groups and realm roles, OR-combined
//! - **Basic auth**: constant-time static credentials for simple setups

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| Error::Internal(format!("tracing already initialised: {e}")))
}
