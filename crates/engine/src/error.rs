//! Engine error taxonomy and its mapping onto process exit codes.

use std::time::Duration;

use omics_run_api::ApiError;
use thiserror::Error;

/// Exit code for a remote resource that entered a failure status.
pub const RESOURCE_FAILURE_EXIT_CODE: u8 = 2;
/// Exit code for every other failure.
pub const GENERIC_FAILURE_EXIT_CODE: u8 = 1;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input shape or an unusable reference; never retried.
    #[error("{0}")]
    Validation(String),

    /// A remote resource entered a failure status while being awaited. Fatal
    /// to the whole invocation.
    #[error("{description} status {status}: {message}")]
    ResourceFailed {
        description: String,
        status: String,
        message: String,
    },

    #[error("{description} still not ready after waiting {waited:?}")]
    ReadinessTimeout { description: String, waited: Duration },

    #[error("failed to package workflow definition: {0}")]
    Definition(#[source] anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ResourceFailed { .. } => RESOURCE_FAILURE_EXIT_CODE,
            _ => GENERIC_FAILURE_EXIT_CODE,
        }
    }
}
