//! Error classification for remote calls.
//!
//! Callers branch on [`ApiError::NotFound`] rather than inspecting error
//! codes; everything else propagates unchanged.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;
use thiserror::Error;

/// Service error codes that mean "the thing you asked for does not exist".
pub const NOT_FOUND_CODES: &[&str] = &["ResourceNotFoundException", "NotFoundException", "NoSuchEntity"];

/// Service error codes that mean "a resource with that identity already exists".
pub const CONFLICT_CODES: &[&str] = &["ConflictException", "ResourceAlreadyExistsException", "EntityAlreadyExists"];

/// Error codes (or code fragments) worth retrying at the transport layer.
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "TooManyRequestsException", "RequestLimitExceeded"];

static XML_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<Code>([^<]+)</Code>").expect("valid regex"));
static XML_MESSAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<Message>([^<]*)</Message>").expect("valid regex"));

#[derive(Debug, Error)]
pub enum ApiError {
    /// The requested resource does not exist.
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// A resource with the same identity already exists, typically because a
    /// concurrent caller created it first.
    #[error("{operation} conflicted on {resource}: {message}")]
    Conflict {
        operation: &'static str,
        resource: String,
        message: String,
    },

    /// The service answered with an error status.
    #[error("{operation} failed (HTTP {status}{}): {message}", code.as_deref().map(|c| format!(", {c}")).unwrap_or_default())]
    Service {
        operation: &'static str,
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The request never produced a response.
    #[error("{operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The response body did not have the expected shape.
    #[error("could not decode {operation} response: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("AWS credentials: {0}")]
    Credentials(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether a retry at the transport layer could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Service { status, code, .. } => {
                *status == 429
                    || *status >= 500
                    || code
                        .as_deref()
                        .is_some_and(|code| THROTTLING_CODES.iter().any(|known| code == *known))
            }
            Self::Transport { source, .. } => source.is_timeout() || source.is_connect(),
            _ => false,
        }
    }
}

/// Turn an unsuccessful HTTP response into an [`ApiError`].
///
/// The error code is taken from the `x-amzn-ErrorType` header, a JSON
/// `__type`/`code` field, or an XML `<Code>` element, in that order.
pub(crate) fn classify_failure(operation: &'static str, resource: &str, status: u16, headers: &HeaderMap, body: &str) -> ApiError {
    let code = error_code(headers, body);
    let not_found = status == 404 || code.as_deref().is_some_and(|code| NOT_FOUND_CODES.contains(&code));
    if not_found {
        return ApiError::NotFound {
            resource: resource.to_string(),
        };
    }
    if status == 409 || code.as_deref().is_some_and(|code| CONFLICT_CODES.contains(&code)) {
        return ApiError::Conflict {
            operation,
            resource: resource.to_string(),
            message: error_message(body),
        };
    }
    ApiError::Service {
        operation,
        status,
        code,
        message: error_message(body),
    }
}

fn error_code(headers: &HeaderMap, body: &str) -> Option<String> {
    if let Some(raw) = headers.get("x-amzn-errortype").and_then(|value| value.to_str().ok()) {
        let code = raw.split(':').next().unwrap_or(raw).trim();
        if !code.is_empty() {
            return Some(code.to_string());
        }
    }
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        let code = map.get("__type").or_else(|| map.get("code")).and_then(|value| value.as_str());
        if let Some(code) = code {
            return Some(code.rsplit('#').next().unwrap_or(code).to_string());
        }
    }
    XML_CODE.captures(body).map(|caps| caps[1].trim().to_string())
}

fn error_message(body: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        let message = map.get("message").or_else(|| map.get("Message")).and_then(|value| value.as_str());
        if let Some(message) = message {
            return message.to_string();
        }
    }
    if let Some(caps) = XML_MESSAGE.captures(body) {
        return caps[1].trim().to_string();
    }
    let trimmed = body.trim();
    if trimmed.is_empty() { "(no error message)".to_string() } else { trimmed.to_string() }
}
