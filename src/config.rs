//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::auth::AuthorizationPolicy;
use crate::auth::discovery::EndpointOverrides;
use crate::{Error, Result};

/// Environment variable prefix. Nested keys are separated by `__`,
/// e.g. `DASHBOARD_AUTH__OIDC__CLIENT_ID`.
pub const ENV_PREFIX: &str = "DASHBOARD_";

const REDACTED: &str = "<redacted>";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before secrets are resolved.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
        }
    }
}

/// Which provider gates the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Single static username/password.
    Basic,
    /// OpenID Connect authorization code flow. `keycloak` is accepted as an alias.
    #[serde(alias = "keycloak")]
    Oidc,
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Selected provider. Unset means the server refuses to start.
    pub provider: Option<ProviderKind>,
    /// Usernames allowed in. Sequence or comma-separated string.
    #[serde(deserialize_with = "string_list")]
    pub allowed_users: Vec<String>,
    /// Groups allowed in (OIDC `groups` claim).
    #[serde(deserialize_with = "string_list")]
    pub allowed_groups: Vec<String>,
    /// Realm roles allowed in (OIDC `realm_access.roles` claim).
    #[serde(deserialize_with = "string_list")]
    pub allowed_roles: Vec<String>,
    /// Basic provider settings
    pub basic: BasicConfig,
    /// OIDC provider settings
    pub oidc: OidcConfig,
}

impl AuthConfig {
    /// The allow-list policy described by this configuration.
    #[must_use]
    pub fn policy(&self) -> AuthorizationPolicy {
        AuthorizationPolicy::new(
            self.allowed_users.iter().cloned(),
            self.allowed_groups.iter().cloned(),
            self.allowed_roles.iter().cloned(),
        )
    }
}

/// Basic provider settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    /// Expected username
    pub username: String,
    /// Expected password, or `env:VAR_NAME`
    pub password: String,
}

impl BasicConfig {
    /// Resolve the password, following `env:` indirection.
    ///
    /// # Errors
    ///
    /// Returns an error if the referenced variable is unset or the result is empty.
    pub fn resolve_password(&self) -> Result<String> {
        resolve_secret(&self.password)?
            .ok_or_else(|| Error::Config("auth.basic.password is required".to_string()))
    }
}

/// OIDC provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Issuer URL; discovery is fetched from `{issuer}/.well-known/openid-configuration`
    pub issuer: String,
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret, or `env:VAR_NAME`. Omit for public clients.
    pub client_secret: Option<String>,
    /// Accepted for compatibility. PKCE is always used.
    pub pkce: bool,
    /// Overrides the discovered authorization endpoint
    pub authorization_endpoint: Option<String>,
    /// Overrides the discovered token endpoint
    pub token_endpoint: Option<String>,
    /// Overrides the discovered end-session endpoint
    pub end_session_endpoint: Option<String>,
    /// Overrides the discovered key-set URI
    pub jwks_uri: Option<String>,
    /// Deadline for every outbound call to the identity provider
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    /// How often expired sessions are swept
    #[serde(with = "humantime_serde")]
    pub session_sweep_interval: Duration,
    /// How often abandoned logins are swept
    #[serde(with = "humantime_serde")]
    pub pending_sweep_interval: Duration,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            client_id: String::new(),
            client_secret: None,
            pkce: true,
            authorization_endpoint: None,
            token_endpoint: None,
            end_session_endpoint: None,
            jwks_uri: None,
            http_timeout: Duration::from_secs(10),
            session_sweep_interval: Duration::from_secs(5 * 60),
            pending_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl OidcConfig {
    /// Resolve the client secret, following `env:` indirection.
    /// An absent or empty secret yields `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if an `env:` reference names an unset variable.
    pub fn resolve_client_secret(&self) -> Result<Option<String>> {
        match &self.client_secret {
            Some(raw) => resolve_secret(raw),
            None => Ok(None),
        }
    }

    /// Endpoint overrides to apply on top of discovery.
    #[must_use]
    pub fn overrides(&self) -> EndpointOverrides {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        EndpointOverrides {
            authorization_endpoint: non_empty(&self.authorization_endpoint),
            token_endpoint: non_empty(&self.token_endpoint),
            end_session_endpoint: non_empty(&self.end_session_endpoint),
            jwks_uri: non_empty(&self.jwks_uri),
        }
    }
}

/// Resolve a secret value. `env:NAME` reads the variable `NAME`; anything
/// else is the literal value. Empty results are `None`.
fn resolve_secret(raw: &str) -> Result<Option<String>> {
    let value = if let Some(var_name) = raw.strip_prefix("env:") {
        env::var(var_name)
            .map_err(|_| Error::Config(format!("environment variable {var_name} is not set")))?
    } else {
        raw.to_string()
    };
    Ok(Some(value).filter(|v| !v.is_empty()))
}

/// Literal secrets are hidden; `env:` references are shown as-is.
fn redact(raw: &str) -> String {
    if raw.is_empty() || raw.starts_with("env:") {
        raw.to_string()
    } else {
        REDACTED.to_string()
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!("Config file not found: {}", p.display())));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment.extract().map_err(|e| Error::Config(e.to_string()))?;

        // Secrets are resolved lazily by the providers, after this point
        config.load_env_files();

        Ok(config)
    }

    /// Check that the selected provider has what it needs.
    ///
    /// # Errors
    ///
    /// Returns the first problem found as [`Error::Config`].
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::Config(msg.to_string()));
        match self.auth.provider {
            None => invalid("auth.provider is required (basic or oidc)"),
            Some(ProviderKind::Basic) => {
                let basic = &self.auth.basic;
                if basic.username.is_empty() {
                    return invalid("auth.basic.username is required");
                }
                basic.resolve_password().map(|_| ())
            }
            Some(ProviderKind::Oidc) => {
                let oidc = &self.auth.oidc;
                if oidc.issuer.is_empty() {
                    return invalid("auth.oidc.issuer is required");
                }
                if url::Url::parse(&oidc.issuer).is_err() {
                    return invalid("auth.oidc.issuer is not a valid URL");
                }
                if oidc.client_id.is_empty() {
                    return invalid("auth.oidc.client_id is required");
                }
                if oidc.http_timeout.is_zero() {
                    return invalid("auth.oidc.http_timeout must be greater than zero");
                }
                if oidc.session_sweep_interval.is_zero() || oidc.pending_sweep_interval.is_zero() {
                    return invalid("auth.oidc sweep intervals must be greater than zero");
                }
                oidc.resolve_client_secret().map(|_| ())
            }
        }
    }

    /// A copy safe to print: literal secrets are replaced.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.auth.basic.password = redact(&copy.auth.basic.password);
        copy.auth.oidc.client_secret = copy.auth.oidc.client_secret.as_deref().map(redact);
        copy
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = match (path_str.strip_prefix('~'), dirs::home_dir()) {
                (Some(rest), Some(home)) => format!("{}{rest}", home.display()),
                _ => path_str.clone(),
            };

            let path = Path::new(&expanded);
            if !path.exists() {
                tracing::debug!(path = %expanded, "Env file not found (skipped)");
                continue;
            }
            match dotenvy::from_path(path) {
                Ok(()) => tracing::info!(path = %expanded, "Loaded env file"),
                Err(e) => tracing::warn!(path = %expanded, error = %e, "Failed to load env file"),
            }
        }
    }
}

/// Accept a YAML sequence or a comma-separated string (the form an
/// environment variable takes).
fn string_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<String>),
        One(String),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        OneOrMany::One(joined) => joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
    })
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "1h", "100ms").
    /// A bare number is taken as seconds.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        let s = match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(s) => s,
        };
        let s = s.trim();

        let parse = |n: &str| n.trim().parse::<u64>().map_err(serde::de::Error::custom);
        // "ms" must be tried before "m" and "s"
        if let Some(ms) = s.strip_suffix("ms") {
            parse(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            parse(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            parse(mins).map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            parse(hours).map(|h| Duration::from_secs(h * 3600))
        } else {
            parse(s).map(Duration::from_secs)
        }
    }
}
