//! Signed HTTP transport shared by the service clients.
//!
//! Every attempt is signed afresh. Connection failures, timeouts, HTTP 429,
//! HTTP 5xx and throttling codes are retried with exponential backoff up to
//! the configured attempt count; create and start calls carry idempotency
//! tokens, so a retried request never duplicates a resource.

use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, header};
use tracing::{debug, warn};
use url::Url;

use crate::{
    ApiError, AwsConfig, SharedCredentials,
    error::classify_failure,
    sigv4::{self, SigningParams},
};

const BASE_BACKOFF: Duration = Duration::from_millis(200);

/// One outgoing request, before signing.
#[derive(Debug)]
pub(crate) struct SignedRequest<'a> {
    pub operation: &'static str,
    /// Human-readable name of the addressed resource, used for not-found errors.
    pub resource: String,
    pub method: Method,
    pub path: String,
    pub query: Vec<(&'a str, &'a str)>,
    pub body: Option<(Vec<u8>, &'static str)>,
}

impl<'a> SignedRequest<'a> {
    pub fn get(operation: &'static str, resource: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            operation,
            resource: resource.into(),
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(operation: &'static str, resource: impl Into<String>, path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            operation,
            resource: resource.into(),
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some((body, "application/json")),
        }
    }

    pub fn query(mut self, key: &'a str, value: &'a str) -> Self {
        self.query.push((key, value));
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SignedTransport {
    http: Client,
    endpoint: Url,
    credentials: SharedCredentials,
    signing_region: String,
    service: &'static str,
    max_attempts: u32,
    user_agent: String,
}

impl SignedTransport {
    pub fn new(config: &AwsConfig, endpoint: Url, signing_region: String, service: &'static str) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Config(format!("build http client: {e}")))?;
        Ok(Self::with_client(
            http,
            endpoint,
            config.credentials.clone(),
            signing_region,
            service,
            config.max_attempts,
        ))
    }

    pub fn with_client(
        http: Client,
        endpoint: Url,
        credentials: SharedCredentials,
        signing_region: String,
        service: &'static str,
        max_attempts: u32,
    ) -> Self {
        Self {
            http,
            endpoint,
            credentials,
            signing_region,
            service,
            max_attempts: max_attempts.max(1),
            user_agent: format!("omics-run/{}; {}", env!("CARGO_PKG_VERSION"), std::env::consts::OS),
        }
    }

    /// Send a request and return the body of a successful response.
    pub async fn send(&self, request: SignedRequest<'_>) -> Result<String, ApiError> {
        let url = self.url_for(&request)?;
        let mut attempt = 1;
        loop {
            match self.send_once(&request, &url).await {
                Err(error) if error.is_retryable() && attempt < self.max_attempts => {
                    let delay = BASE_BACKOFF * 2u32.pow(attempt - 1);
                    warn!(operation = request.operation, attempt, ?delay, %error, "retrying request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    fn url_for(&self, request: &SignedRequest<'_>) -> Result<Url, ApiError> {
        request_url(&self.endpoint, &request.path, &request.query)
    }

    async fn send_once(&self, request: &SignedRequest<'_>, url: &Url) -> Result<String, ApiError> {
        let credentials = self.credentials.get().await?;
        let params = SigningParams {
            credentials: &credentials,
            region: &self.signing_region,
            service: self.service,
            time: Utc::now(),
        };

        let mut signed_headers = vec![
            ("host".to_string(), host_header(url)),
            ("x-amz-date".to_string(), params.amz_date()),
        ];
        if let Some(token) = &credentials.session_token {
            signed_headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        if let Some((_, content_type)) = &request.body {
            signed_headers.push(("content-type".to_string(), content_type.to_string()));
        }

        let payload = request.body.as_ref().map(|(bytes, _)| bytes.as_slice()).unwrap_or_default();
        let authorization = sigv4::authorization(request.method.as_str(), url, &signed_headers, payload, &params);

        let mut builder = self
            .http
            .request(request.method.clone(), url.clone())
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::AUTHORIZATION, authorization);
        for (name, value) in &signed_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((bytes, _)) = &request.body {
            builder = builder.body(bytes.clone());
        }

        debug!(operation = request.operation, method = %request.method, %url, "sending request");
        execute(request.operation, &request.resource, builder).await
    }
}

/// Send a prepared request and return the body of a successful response,
/// classifying failures like every other call.
pub(crate) async fn execute(operation: &'static str, resource: &str, builder: RequestBuilder) -> Result<String, ApiError> {
    let response = builder
        .send()
        .await
        .map_err(|source| ApiError::Transport { operation, source })?;
    let status = response.status();
    let headers = response.headers().clone();
    let text = response
        .text()
        .await
        .map_err(|source| ApiError::Transport { operation, source })?;

    if status.is_success() {
        debug!(operation, status = status.as_u16(), "request succeeded");
        return Ok(text);
    }
    Err(classify_failure(operation, resource, status.as_u16(), &headers, &text))
}

/// Append `path` to the endpoint's own path, so overrides such as
/// `http://localhost:4566/omics/` keep their prefix.
pub(crate) fn request_url(endpoint: &Url, path: &str, query: &[(&str, &str)]) -> Result<Url, ApiError> {
    if endpoint.cannot_be_a_base() {
        return Err(ApiError::Config(format!("endpoint '{endpoint}' cannot carry a request path")));
    }
    let mut url = endpoint.clone();
    let base = endpoint.path().trim_end_matches('/');
    url.set_path(&format!("{base}/{}", path.trim_start_matches('/')));
    url.set_fragment(None);
    if query.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&sigv4::encode_query(query)));
    }
    Ok(url)
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Decode a JSON response body, attributing failures to `operation`.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(operation: &'static str, body: &str) -> Result<T, ApiError> {
    let body = if body.trim().is_empty() { "{}" } else { body };
    serde_json::from_str(body).map_err(|source| ApiError::Decode { operation, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_header_keeps_non_default_port() {
        assert_eq!(host_header(&Url::parse("http://localhost:8080/x").unwrap()), "localhost:8080");
        assert_eq!(host_header(&Url::parse("https://iam.amazonaws.com/").unwrap()), "iam.amazonaws.com");
    }

    #[test]
    fn request_paths_extend_the_endpoint_path() {
        let plain = Url::parse("https://workflows-omics.us-west-2.amazonaws.com").unwrap();
        assert_eq!(
            request_url(&plain, "/workflow", &[("type", "PRIVATE")]).unwrap().as_str(),
            "https://workflows-omics.us-west-2.amazonaws.com/workflow?type=PRIVATE"
        );

        let prefixed = Url::parse("http://localhost:4566/omics/").unwrap();
        assert_eq!(
            request_url(&prefixed, "/workflow/1234567/version/abc", &[]).unwrap().as_str(),
            "http://localhost:4566/omics/workflow/1234567/version/abc"
        );
        let unslashed = Url::parse("http://localhost:4566/omics").unwrap();
        assert_eq!(request_url(&unslashed, "/run", &[]).unwrap().path(), "/omics/run");
        assert_eq!(request_url(&prefixed, "/", &[("Action", "GetRole")]).unwrap().as_str(), "http://localhost:4566/omics/?Action=GetRole");
    }

    #[test]
    fn empty_bodies_decode_as_empty_objects() {
        let value: serde_json::Value = decode("CreateWorkflowVersion", "").unwrap();
        assert_eq!(value, serde_json::json!({}));
    }
}
