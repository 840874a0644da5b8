//! Identity token verification.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header without verifying anything, to read `kid` and `alg`.
//!    No `kid` means no key to check against: reject.
//! 2. Refuse any algorithm outside RS256/RS384/RS512 before touching the key
//!    cache, so `none`, HMAC and EC tokens never trigger a JWKS fetch.
//! 3. Resolve the key through [`SigningKeyCache`] (one refresh on miss).
//! 4. Decode again with signature and issuer checks; `exp` is validated when
//!    present with 60 seconds of leeway.
//! 5. Map the claims onto an [`Identity`].
//!
//! # Claim precedence
//!
//! - username: `preferred_username`, else `sub`. Empty strings count as absent.
//! - roles: `realm_access.roles`; absent or malformed → empty set.
//! - groups: `groups`; absent or malformed → empty set.
//!
//! Non-string members of the role and group arrays are dropped, the rest kept.

use std::collections::BTreeSet;
use std::sync::Arc;

use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use super::jwks::SigningKeyCache;
use super::{AuthError, Identity};

/// Clock-skew tolerance for `exp`, in seconds.
const LEEWAY_SECS: u64 = 60;

/// Claims read from the identity token. Everything is optional; the
/// precedence rules above decide what becomes the identity.
#[derive(Debug, Default, Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default, deserialize_with = "lenient_realm_access")]
    realm_access: RealmAccess,
    #[serde(default, deserialize_with = "lenient_strings")]
    groups: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RealmAccess {
    #[serde(default, deserialize_with = "lenient_strings")]
    roles: Vec<String>,
}

/// Accept an array and keep its string members; any other shape yields empty.
fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_realm_access<'de, D>(deserializer: D) -> Result<RealmAccess, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

impl IdTokenClaims {
    fn into_identity(self) -> Option<Identity> {
        let username = self
            .preferred_username
            .filter(|u| !u.is_empty())
            .or(self.sub.filter(|s| !s.is_empty()))?;
        Some(Identity {
            username,
            roles: self.realm_access.roles.into_iter().collect::<BTreeSet<_>>(),
            groups: self.groups.into_iter().collect::<BTreeSet<_>>(),
        })
    }
}

/// Verifies identity tokens against the provider's published keys.
pub struct TokenVerifier {
    keys: Arc<SigningKeyCache>,
}

impl TokenVerifier {
    /// Create a verifier backed by `keys`.
    #[must_use]
    pub fn new(keys: Arc<SigningKeyCache>) -> Self {
        Self { keys }
    }

    /// Verify `token` and extract the identity it asserts.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenVerification`] for any structural, algorithm, key,
    /// signature, expiry or issuer problem. No partial identity is returned.
    pub async fn verify(&self, token: &str, expected_issuer: &str) -> Result<Identity, AuthError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::TokenVerification(format!("malformed token: {e}")))?;

        let kid = header
            .kid
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AuthError::TokenVerification("missing kid in token header".into()))?;

        if !matches!(header.alg, Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512) {
            return Err(AuthError::TokenVerification(format!(
                "unexpected signing method: {:?}",
                header.alg
            )));
        }

        let key = self.keys.get_key(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[expected_issuer]);
        validation.set_required_spec_claims(&["iss"]);
        validation.validate_aud = false;
        validation.leeway = LEEWAY_SECS;

        let data = jsonwebtoken::decode::<IdTokenClaims>(token, &key, &validation)
            .map_err(|e| AuthError::TokenVerification(format!("verify token: {e}")))?;

        let identity = data
            .claims
            .into_identity()
            .ok_or_else(|| AuthError::TokenVerification("token names no subject".into()))?;

        debug!(username = %identity.username, kid = %kid, "Identity token verified");
        Ok(identity)
    }
}
