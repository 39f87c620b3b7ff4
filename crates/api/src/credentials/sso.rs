//! IAM Identity Center role credentials from a cached `aws sso login` token.

use std::fs;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{Credentials, ProviderContext, SsoRole, parse_timestamp};
use crate::{
    ApiError,
    transport::{decode, execute, request_url},
};

/// Token cache entry written by the AWS CLI.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedToken {
    #[serde(default)]
    start_url: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleCredentialsResponse {
    role_credentials: RoleCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleCredentials {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    session_token: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(default)]
    expiration: Option<i64>,
}

pub(super) fn portal_endpoint(sso_region: &str) -> Result<Url, ApiError> {
    let suffix = if sso_region.starts_with("cn-") { "amazonaws.com.cn" } else { "amazonaws.com" };
    Url::parse(&format!("https://portal.sso.{sso_region}.{suffix}"))
        .map_err(|e| ApiError::Config(format!("invalid sso_region '{sso_region}': {e}")))
}

pub(super) async fn role_credentials(context: &ProviderContext, role: &SsoRole) -> Result<Credentials, ApiError> {
    let operation = "GetRoleCredentials";
    let token = cached_token(role, Utc::now())?;
    let url = request_url(
        &role.portal_endpoint,
        "/federation/credentials",
        &[("account_id", role.account_id.as_str()), ("role_name", role.role_name.as_str())],
    )?;
    let request = context.http.get(url).header("x-amz-sso_bearer_token", token);
    let body = execute(operation, &format!("SSO role {} in account {}", role.role_name, role.account_id), request).await?;
    let response: RoleCredentialsResponse = decode(operation, &body)?;

    let wire = response.role_credentials;
    let mut credentials = Credentials::new(wire.access_key_id, wire.secret_access_key);
    credentials.session_token = wire.session_token;
    credentials.expires_at = wire.expiration.and_then(DateTime::from_timestamp_millis);
    Ok(credentials)
}

/// Newest unexpired access token cached for the role's start URL.
fn cached_token(role: &SsoRole, now: DateTime<Utc>) -> Result<String, ApiError> {
    let login_hint = match &role.session_name {
        Some(session) => format!("run `aws sso login --sso-session {session}`"),
        None => "run `aws sso login`".to_string(),
    };
    let entries = fs::read_dir(&role.cache_dir).map_err(|e| {
        ApiError::Credentials(format!(
            "no SSO token cache at {} ({e}); {login_hint}",
            role.cache_dir.display()
        ))
    })?;

    let wanted = role.start_url.trim_end_matches('/');
    let mut newest: Option<(DateTime<Utc>, String)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Ok(text) = fs::read_to_string(&path) else {
            continue;
        };
        let Ok(token) = serde_json::from_str::<CachedToken>(&text) else {
            continue;
        };
        let (Some(start_url), Some(access_token), Some(expires_at)) = (token.start_url, token.access_token, token.expires_at) else {
            continue;
        };
        if start_url.trim_end_matches('/') != wanted {
            continue;
        }
        // the v1 CLI wrote `...UTC` instead of `...Z`
        let expires_at = parse_timestamp("SSO token cache", &expires_at.replace("UTC", "Z"))?;
        debug!(path = %path.display(), %expires_at, "found cached SSO token");
        if newest.as_ref().is_none_or(|(current, _)| expires_at > *current) {
            newest = Some((expires_at, access_token));
        }
    }

    match newest {
        Some((expires_at, token)) if expires_at > now => Ok(token),
        Some((expires_at, _)) => Err(ApiError::Credentials(format!(
            "SSO token for {} expired at {expires_at}; {login_hint}",
            role.start_url
        ))),
        None => Err(ApiError::Credentials(format!(
            "no cached SSO token for {}; {login_hint}",
            role.start_url
        ))),
    }
}
