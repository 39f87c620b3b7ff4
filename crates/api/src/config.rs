//! Client configuration discovered from the environment.
//!
//! Endpoint overrides (`OMICS_ENDPOINT_URL`, `IAM_ENDPOINT_URL`,
//! `AWS_ENDPOINT_URL_STS`) are validated before use: `localhost`/`127.0.0.1`
//! may use any scheme, every other host must use HTTPS and belong to an AWS
//! domain.

use std::{env, time::Duration};

use tracing::debug;
use url::Url;

use crate::{
    ApiError, SharedCredentials,
    credentials::{self, CredentialSource, Environment, ProfileSet, ProviderContext},
};

/// Environment variable overriding the HealthOmics workflows endpoint.
pub const OMICS_ENDPOINT_ENV: &str = "OMICS_ENDPOINT_URL";
/// Environment variable overriding the IAM endpoint.
pub const IAM_ENDPOINT_ENV: &str = "IAM_ENDPOINT_URL";
/// Environment variable overriding the STS endpoint used for role assumption.
pub const STS_ENDPOINT_ENV: &str = "AWS_ENDPOINT_URL_STS";

/// Base domains accepted for non-local endpoint overrides. Subdomains are
/// also allowed.
const ALLOWED_AWS_DOMAINS: &[&str] = &["amazonaws.com", "amazonaws.com.cn", "api.aws"];
/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything the service clients need to sign and address requests.
#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub region: String,
    pub credentials: SharedCredentials,
    pub omics_endpoint: Url,
    pub iam_endpoint: Url,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl AwsConfig {
    /// Build a configuration from the environment and shared AWS files.
    ///
    /// `region_override` (typically `--region`) wins over every other source.
    /// Credentials are only discovered here; they are fetched when the first
    /// request is signed.
    pub fn from_env(region_override: Option<&str>) -> Result<Self, ApiError> {
        let aws_env = Environment::from_process();
        let profiles = ProfileSet::load(&aws_env);
        let region = region_override
            .map(str::to_string)
            .or_else(|| credentials::resolve_region(&aws_env, &profiles))
            .ok_or_else(|| ApiError::Config("no AWS region configured; pass --region or set AWS_REGION".into()))?;

        let source = CredentialSource::discover(&aws_env, &profiles)?;
        debug!(%source, "selected AWS credential provider");
        let sts_endpoint = match aws_env.var(STS_ENDPOINT_ENV) {
            Some(raw) => validate_endpoint(raw, STS_ENDPOINT_ENV)?,
            None => credentials::default_sts_endpoint(&region)?,
        };
        let credentials = SharedCredentials::from_source(source, ProviderContext::new(region.clone(), sts_endpoint)?);

        let omics_endpoint = match env::var(OMICS_ENDPOINT_ENV) {
            Ok(raw) if !raw.trim().is_empty() => validate_endpoint(raw.trim(), OMICS_ENDPOINT_ENV)?,
            _ => default_omics_endpoint(&region)?,
        };
        let iam_endpoint = match env::var(IAM_ENDPOINT_ENV) {
            Ok(raw) if !raw.trim().is_empty() => validate_endpoint(raw.trim(), IAM_ENDPOINT_ENV)?,
            _ => default_iam_endpoint(&region)?,
        };

        Ok(Self {
            region,
            credentials,
            omics_endpoint,
            iam_endpoint,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: 3,
        })
    }

    /// Configuration pointing both services at one (usually local) endpoint.
    pub fn for_endpoint(region: impl Into<String>, credentials: impl Into<SharedCredentials>, endpoint: Url) -> Self {
        Self {
            region: region.into(),
            credentials: credentials.into(),
            omics_endpoint: endpoint.clone(),
            iam_endpoint: endpoint,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: 3,
        }
    }
}

fn default_omics_endpoint(region: &str) -> Result<Url, ApiError> {
    let suffix = if region.starts_with("cn-") { "amazonaws.com.cn" } else { "amazonaws.com" };
    Url::parse(&format!("https://workflows-omics.{region}.{suffix}"))
        .map_err(|e| ApiError::Config(format!("invalid region '{region}': {e}")))
}

fn default_iam_endpoint(region: &str) -> Result<Url, ApiError> {
    let raw = if region.starts_with("cn-") {
        "https://iam.cn-north-1.amazonaws.com.cn"
    } else {
        "https://iam.amazonaws.com"
    };
    Url::parse(raw).map_err(|e| ApiError::Config(e.to_string()))
}

/// Validate that an endpoint override is acceptable for signed requests.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS, and host must be one of the allowed
///   AWS domains or a subdomain thereof
pub fn validate_endpoint(raw: &str, var: &str) -> Result<Url, ApiError> {
    let parsed = Url::parse(raw).map_err(|e| ApiError::Config(format!("invalid {var} URL '{raw}': {e}")))?;

    let host_name = parsed
        .host_str()
        .ok_or_else(|| ApiError::Config(format!("{var} must include a host")))?;

    if LOCALHOST_DOMAINS.iter().any(|&allowed| host_name.eq_ignore_ascii_case(allowed)) {
        return Ok(parsed);
    }

    if parsed.scheme() != "https" {
        return Err(ApiError::Config(format!(
            "{var} must use https for non-localhost hosts; got '{}://'",
            parsed.scheme()
        )));
    }

    let is_allowed_domain = ALLOWED_AWS_DOMAINS.iter().any(|&allowed_domain| {
        host_name.eq_ignore_ascii_case(allowed_domain) || host_name.to_ascii_lowercase().ends_with(&format!(".{allowed_domain}"))
    });
    if !is_allowed_domain {
        return Err(ApiError::Config(format!(
            "{var} host '{host_name}' is not allowed; must be within {ALLOWED_AWS_DOMAINS:?} or localhost"
        )));
    }

    Ok(parsed)
}
