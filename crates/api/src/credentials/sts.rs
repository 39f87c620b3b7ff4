//! STS role assumption.

use std::{fs, path::Path};

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::{AssumeRole, Credentials, ProviderContext, SharedCredentials, parse_timestamp};
use crate::{
    ApiError,
    transport::{SignedRequest, SignedTransport, execute, request_url},
};

const SIGNING_SERVICE: &str = "sts";
const API_VERSION: &str = "2011-06-15";

static ACCESS_KEY_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"<AccessKeyId>\s*([^<\s]+)\s*</AccessKeyId>").expect("valid regex"));
static SECRET_ACCESS_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<SecretAccessKey>\s*([^<\s]+)\s*</SecretAccessKey>").expect("valid regex"));
static SESSION_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<SessionToken>\s*([^<\s]+)\s*</SessionToken>").expect("valid regex"));
static EXPIRATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"<Expiration>\s*([^<\s]+)\s*</Expiration>").expect("valid regex"));

/// Regional STS endpoint for `region`.
pub fn default_endpoint(region: &str) -> Result<Url, ApiError> {
    let suffix = if region.starts_with("cn-") { "amazonaws.com.cn" } else { "amazonaws.com" };
    Url::parse(&format!("https://sts.{region}.{suffix}")).map_err(|e| ApiError::Config(format!("invalid region '{region}': {e}")))
}

pub(super) async fn assume_role(context: &ProviderContext, assume: &AssumeRole, source: Credentials) -> Result<Credentials, ApiError> {
    let operation = "AssumeRole";
    let transport = SignedTransport::with_client(
        context.http.clone(),
        context.sts_endpoint.clone(),
        SharedCredentials::fixed(source),
        context.region.clone(),
        SIGNING_SERVICE,
        context.max_attempts,
    );
    let duration = assume.duration_seconds.map(|seconds| seconds.to_string());
    let mut request = SignedRequest::get(operation, format!("IAM role {}", assume.role_arn), "/")
        .query("Action", operation)
        .query("Version", API_VERSION)
        .query("RoleArn", &assume.role_arn)
        .query("RoleSessionName", &assume.session_name);
    if let Some(external_id) = &assume.external_id {
        request = request.query("ExternalId", external_id);
    }
    if let Some(duration) = &duration {
        request = request.query("DurationSeconds", duration);
    }
    let body = transport.send(request).await?;
    parse_credentials(operation, &body)
}

/// Exchange an OIDC token for role credentials. The call is unsigned.
pub(super) async fn assume_role_with_web_identity(
    context: &ProviderContext,
    role_arn: &str,
    token_file: &Path,
    session_name: &str,
) -> Result<Credentials, ApiError> {
    let operation = "AssumeRoleWithWebIdentity";
    let token = fs::read_to_string(token_file)
        .map_err(|e| ApiError::Credentials(format!("read web identity token {}: {e}", token_file.display())))?;
    let url = request_url(
        &context.sts_endpoint,
        "/",
        &[
            ("Action", operation),
            ("Version", API_VERSION),
            ("RoleArn", role_arn),
            ("RoleSessionName", session_name),
            ("WebIdentityToken", token.trim()),
        ],
    )?;
    let body = execute(operation, &format!("IAM role {role_arn}"), context.http.get(url)).await?;
    parse_credentials(operation, &body)
}

fn parse_credentials(operation: &str, body: &str) -> Result<Credentials, ApiError> {
    let field = |pattern: &Regex| pattern.captures(body).map(|caps| caps[1].to_string());
    let (Some(access_key_id), Some(secret_access_key)) = (field(&ACCESS_KEY_ID), field(&SECRET_ACCESS_KEY)) else {
        return Err(ApiError::Credentials(format!("{operation} response did not contain credentials")));
    };
    let mut credentials = Credentials::new(access_key_id, secret_access_key);
    credentials.session_token = field(&SESSION_TOKEN);
    if let Some(expiration) = field(&EXPIRATION) {
        credentials.expires_at = Some(parse_timestamp(operation, &expiration)?);
    }
    Ok(credentials)
}
