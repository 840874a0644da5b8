//! Signing key cache: `kid` → RSA verification key.
//!
//! # Refresh policy
//!
//! There is no TTL. Providers rotate by publishing a new key under a new
//! `kid`, so a lookup miss is the only refresh trigger:
//!
//! 1. Read-lock lookup against the current set.
//! 2. On miss, fetch the full JWKS once and replace the set wholesale under
//!    the write lock (never a partial merge).
//! 3. Look up once more. A second miss is final for this request.
//!
//! Concurrent misses may each fetch; the replace is idempotent so redundant
//! fetches cannot corrupt the set. No lock is held across the network call.
//!
//! Only `kty: RSA` keys with a `kid` are kept. Anything else in the document
//! is skipped without failing the fetch.

use std::collections::HashMap;
use std::sync::Arc;

use jsonwebtoken::DecodingKey;
use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::discovery::DiscoveryResolver;

/// Key lookup failures.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The `kid` is absent even after a fresh fetch.
    #[error("key {0} not found in JWKS")]
    NotFound(String),

    /// The key set could not be fetched or decoded.
    #[error("JWKS fetch error: {0}")]
    Fetch(String),
}

/// One entry of a JWKS document, with only the fields we read.
#[derive(Debug, Deserialize)]
struct RawJwk {
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawJwkSet {
    #[serde(default)]
    keys: Vec<RawJwk>,
}

/// Cache of the provider's RSA verification keys.
pub struct SigningKeyCache {
    http: reqwest::Client,
    discovery: Arc<DiscoveryResolver>,
    /// Read lock for lookups, write lock for the wholesale replace.
    keys: RwLock<HashMap<String, DecodingKey>>,
}

impl SigningKeyCache {
    /// Create an empty cache; the key-set URI is taken from discovery on first miss.
    #[must_use]
    pub fn new(http: reqwest::Client, discovery: Arc<DiscoveryResolver>) -> Self {
        Self {
            http,
            discovery,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Number of keys currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// `true` if no key has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    /// Resolve the verification key for `kid`, refreshing once on miss.
    ///
    /// # Errors
    ///
    /// [`KeyError::Fetch`] if the refresh fails, [`KeyError::NotFound`] if the
    /// refreshed set still lacks `kid`.
    pub async fn get_key(&self, kid: &str) -> Result<DecodingKey, KeyError> {
        if let Some(key) = self.lookup(kid) {
            return Ok(key);
        }

        debug!(kid = %kid, "Key not in cached JWKS, refreshing");
        self.refresh().await?;

        self.lookup(kid).ok_or_else(|| KeyError::NotFound(kid.to_string()))
    }

    /// Fetch the key set and replace the cache with it.
    ///
    /// # Errors
    ///
    /// [`KeyError::Fetch`] on transport failure, non-success status or an
    /// undecodable body. The existing set is left untouched in that case.
    pub async fn refresh(&self) -> Result<(), KeyError> {
        let uri = self
            .discovery
            .resolve()
            .await
            .map_err(|e| KeyError::Fetch(e.to_string()))?
            .jwks_uri
            .clone();

        let response = self
            .http
            .get(&uri)
            .send()
            .await
            .map_err(|e| KeyError::Fetch(format!("{uri}: {e}")))?;

        if !response.status().is_success() {
            return Err(KeyError::Fetch(format!("{uri} returned HTTP {}", response.status())));
        }

        let set: RawJwkSet = response
            .json()
            .await
            .map_err(|e| KeyError::Fetch(format!("decode {uri}: {e}")))?;

        let fresh = parse_rsa_keys(set);
        debug!(count = fresh.len(), "Replacing cached JWKS");
        *self.keys.write() = fresh;
        Ok(())
    }

    fn lookup(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.read().get(kid).cloned()
    }
}

fn parse_rsa_keys(set: RawJwkSet) -> HashMap<String, DecodingKey> {
    let mut keys = HashMap::with_capacity(set.keys.len());
    for jwk in set.keys {
        if jwk.kty != "RSA" {
            continue;
        }
        let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
            continue;
        };
        match DecodingKey::from_rsa_components(&n, &e) {
            Ok(key) => {
                keys.insert(kid, key);
            }
            Err(err) => warn!(kid = %kid, error = %err, "Skipping malformed RSA JWK"),
        }
    }
    keys
}
