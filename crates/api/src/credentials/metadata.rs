//! Container (ECS/EKS) and EC2 instance metadata credential endpoints.

use std::{fs, time::Duration};

use reqwest::{RequestBuilder, header};
use tracing::debug;
use url::Url;

use super::{ContainerAuth, Credentials, ProviderContext, ProviderDocument};
use crate::{
    ApiError,
    transport::{execute, request_url},
};

const METADATA_TIMEOUT: Duration = Duration::from_secs(2);
const TOKEN_TTL_SECONDS: &str = "21600";
const TOKEN_HEADER: &str = "x-aws-ec2-metadata-token";
const ROLE_PATH: &str = "/latest/meta-data/iam/security-credentials/";

pub(super) async fn container(context: &ProviderContext, uri: &Url, auth: Option<&ContainerAuth>) -> Result<Credentials, ApiError> {
    let mut request = context.http.get(uri.clone()).timeout(METADATA_TIMEOUT);
    if let Some(auth) = auth {
        let token = match auth {
            ContainerAuth::Token(token) => token.clone(),
            ContainerAuth::TokenFile(path) => fs::read_to_string(path)
                .map_err(|e| ApiError::Credentials(format!("read container authorization token {}: {e}", path.display())))?
                .trim()
                .to_string(),
        };
        request = request.header(header::AUTHORIZATION, token);
    }
    let body = execute("GetContainerCredentials", "container credentials", request).await?;
    ProviderDocument::parse("container credentials endpoint", &body)
}

/// IMDSv2 with a session token, or IMDSv1 when the endpoint does not issue
/// tokens.
pub(super) async fn instance(context: &ProviderContext, endpoint: &Url) -> Result<Credentials, ApiError> {
    let token = session_token(context, endpoint).await?;
    debug!(imds_v2 = token.is_some(), "querying instance metadata");

    let roles_url = request_url(endpoint, ROLE_PATH, &[])?;
    let roles = execute("ListInstanceRoles", "instance profile", with_token(context.http.get(roles_url), token.as_deref()))
        .await
        .map_err(|error| match error {
            ApiError::NotFound { .. } => ApiError::Credentials("no IAM role is attached to this instance".into()),
            other => other,
        })?;
    let role = roles
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| ApiError::Credentials("no IAM role is attached to this instance".into()))?;

    let role_url = request_url(endpoint, &format!("{ROLE_PATH}{role}"), &[])?;
    let body = execute(
        "GetInstanceRoleCredentials",
        &format!("instance role {role}"),
        with_token(context.http.get(role_url), token.as_deref()),
    )
    .await?;
    ProviderDocument::parse("instance metadata", &body)
}

async fn session_token(context: &ProviderContext, endpoint: &Url) -> Result<Option<String>, ApiError> {
    let url = request_url(endpoint, "/latest/api/token", &[])?;
    let request = context
        .http
        .put(url)
        .header("x-aws-ec2-metadata-token-ttl-seconds", TOKEN_TTL_SECONDS)
        .timeout(METADATA_TIMEOUT);
    match execute("GetMetadataToken", "instance metadata token", request).await {
        Ok(token) => Ok(Some(token.trim().to_string())),
        Err(ApiError::NotFound { .. } | ApiError::Service { status: 405, .. }) => Ok(None),
        Err(error) => Err(error),
    }
}

fn with_token(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    let request = request.timeout(METADATA_TIMEOUT);
    match token {
        Some(token) => request.header(TOKEN_HEADER, token),
        None => request,
    }
}
