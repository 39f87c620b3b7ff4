//! AWS credential and region discovery.
//!
//! Credentials follow the SDK default chain, first match wins:
//!
//! - `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
//! - the active profile (`AWS_PROFILE`, default `default`) of
//!   `~/.aws/credentials` and `~/.aws/config`: `role_arn` with
//!   `source_profile` or `credential_source`, web identity, IAM Identity
//!   Center (SSO), static keys, then `credential_process`
//! - `AWS_WEB_IDENTITY_TOKEN_FILE` with `AWS_ROLE_ARN`
//! - the ECS/EKS container endpoint (`AWS_CONTAINER_CREDENTIALS_*_URI`)
//! - EC2 instance metadata (IMDSv2, falling back to v1), unless
//!   `AWS_EC2_METADATA_DISABLED=true`
//!
//! Discovery only reads the environment and the shared files; nothing is
//! fetched until the first request is signed. Temporary credentials are
//! cached in [`SharedCredentials`] and refreshed shortly before they expire.
//!
//! Regions come from `AWS_REGION`, `AWS_DEFAULT_REGION`, then the profile in
//! `~/.aws/config`.

use std::{env, fmt, path::PathBuf, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::ApiError;

mod metadata;
mod process;
pub mod profile;
pub mod source;
mod sso;
mod sts;

pub use profile::{DEFAULT_PROFILE, Profile, ProfileSet};
pub use source::{AssumeRole, ContainerAuth, CredentialSource, SsoRole};
pub use sts::default_endpoint as default_sts_endpoint;

/// Temporary credentials are reloaded once they are this close to expiry.
const REFRESH_WINDOW: Duration = Duration::from_secs(5 * 60);
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

/// AWS credentials used for request signing.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    /// When temporary credentials stop working; `None` for long-term keys.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expires_at: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether these credentials expire within `window` of `now`.
    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        self.expires_at.is_some_and(|expires_at| expires_at - window <= now)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A snapshot of the process environment relevant to AWS configuration.
///
/// Only `AWS_*` variables are kept. Tests build one from explicit pairs
/// instead of mutating the real environment.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: Vec<(String, String)>,
    home: Option<PathBuf>,
}

impl Environment {
    pub fn from_process() -> Self {
        Self {
            vars: env::vars().filter(|(name, _)| name.starts_with("AWS_")).collect(),
            home: dirs_next::home_dir(),
        }
    }

    pub fn from_vars<K: Into<String>, V: Into<String>>(vars: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            vars: vars.into_iter().map(|(name, value)| (name.into(), value.into())).collect(),
            home: None,
        }
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Non-blank value of `name`, trimmed.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn home(&self) -> Option<&PathBuf> {
        self.home.as_ref()
    }

    /// Name of the active profile and whether it was chosen explicitly.
    pub fn profile_name(&self) -> (&str, bool) {
        match self.var("AWS_PROFILE") {
            Some(name) => (name, true),
            None => (DEFAULT_PROFILE, false),
        }
    }
}

/// Resolve the region from the environment or the active profile.
pub fn resolve_region(env: &Environment, profiles: &ProfileSet) -> Option<String> {
    if let Some(region) = env.var("AWS_REGION").or_else(|| env.var("AWS_DEFAULT_REGION")) {
        return Some(region.to_string());
    }
    let (profile, _) = env.profile_name();
    profiles.profile(profile)?.get("region").map(str::to_string)
}

/// What credential providers need to reach AWS: an HTTP client, the region
/// and the STS endpoint for role assumption.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub(crate) http: Client,
    pub region: String,
    pub sts_endpoint: Url,
    pub max_attempts: u32,
}

impl ProviderContext {
    pub fn new(region: impl Into<String>, sts_endpoint: Url) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Config(format!("build http client: {e}")))?;
        Ok(Self {
            http,
            region: region.into(),
            sts_endpoint,
            max_attempts: 3,
        })
    }
}

/// Credentials shared by every client built from one configuration.
///
/// Cloning is cheap; clones share one cache.
#[derive(Debug, Clone)]
pub struct SharedCredentials(Arc<Inner>);

#[derive(Debug)]
enum Inner {
    Fixed(Credentials),
    Chain {
        source: CredentialSource,
        context: ProviderContext,
        cached: Mutex<Option<Credentials>>,
    },
}

impl From<Credentials> for SharedCredentials {
    fn from(credentials: Credentials) -> Self {
        Self::fixed(credentials)
    }
}

impl SharedCredentials {
    pub fn fixed(credentials: Credentials) -> Self {
        Self(Arc::new(Inner::Fixed(credentials)))
    }

    pub fn from_source(source: CredentialSource, context: ProviderContext) -> Self {
        Self(Arc::new(Inner::Chain {
            source,
            context,
            cached: Mutex::new(None),
        }))
    }

    /// Current credentials, loading or refreshing them when needed.
    pub async fn get(&self) -> Result<Credentials, ApiError> {
        match self.0.as_ref() {
            Inner::Fixed(credentials) => Ok(credentials.clone()),
            Inner::Chain { source, context, cached } => {
                let mut cached = cached.lock().await;
                if let Some(credentials) = cached.as_ref()
                    && !credentials.expires_within(REFRESH_WINDOW, Utc::now())
                {
                    return Ok(credentials.clone());
                }
                let fresh = source.load(context).await.map_err(|error| match error {
                    ApiError::Credentials(_) => error,
                    other => ApiError::Credentials(format!("{source}: {other}")),
                })?;
                debug!(%source, expires_at = ?fresh.expires_at, "loaded AWS credentials");
                *cached = Some(fresh.clone());
                Ok(fresh)
            }
        }
    }
}

/// Credential document returned by the container and instance metadata
/// endpoints and by `credential_process`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProviderDocument {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    access_key_id: String,
    secret_access_key: String,
    #[serde(default, alias = "SessionToken")]
    token: Option<String>,
    #[serde(default)]
    expiration: Option<String>,
}

impl ProviderDocument {
    fn parse(provider: &str, body: &str) -> Result<Credentials, ApiError> {
        let document: Self = serde_json::from_str(body)
            .map_err(|e| ApiError::Credentials(format!("{provider} returned malformed credentials: {e}")))?;
        if let Some(code) = document.code.as_deref()
            && code != "Success"
        {
            let message = document.message.unwrap_or_default();
            return Err(ApiError::Credentials(format!("{provider} reported {code}: {message}")));
        }
        let mut credentials = Credentials::new(document.access_key_id, document.secret_access_key);
        credentials.session_token = document.token.filter(|token| !token.is_empty());
        if let Some(expiration) = document.expiration.as_deref() {
            credentials.expires_at = Some(parse_timestamp(provider, expiration)?);
        }
        Ok(credentials)
    }
}

fn parse_timestamp(provider: &str, raw: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| ApiError::Credentials(format!("{provider} returned an invalid expiration '{raw}': {e}")))
}
