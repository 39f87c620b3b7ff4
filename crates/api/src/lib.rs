//! AWS HealthOmics and IAM client utilities.
//!
//! This crate provides the remote-call adapters the reconciliation engine
//! consumes. It focuses on:
//!
//! - Discovering region and credentials through the SDK default chain:
//!   environment, shared profiles (roles, SSO, `credential_process`), web
//!   identity, container and instance metadata
//! - Validating endpoint overrides for safety
//! - Signing every request with SigV4 and retrying transient failures
//! - Classifying failures into a closed [`ApiError`] set, so callers can
//!   branch on [`ApiError::NotFound`] instead of matching error codes
//!
//! The engine depends only on the [`WorkflowService`] and
//! [`IdentityService`] traits; [`OmicsClient`] and [`IamClient`] are the
//! production implementations.
//!
//! # Example
//!
//! ```ignore
//! use omics_run_api::{AwsConfig, OmicsClient, WorkflowService};
//!
//! let config = AwsConfig::from_env(Some("us-west-2"))?;
//! let omics = OmicsClient::new(&config)?;
//! println!("region: {}", omics.region());
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod iam;
pub mod omics;
pub mod service;
pub mod sigv4;
mod transport;

pub use config::AwsConfig;
pub use credentials::{CredentialSource, Credentials, SharedCredentials};
pub use error::ApiError;
pub use iam::IamClient;
pub use omics::OmicsClient;
pub use service::{
    CreateWorkflowRequest, CreateWorkflowVersionRequest, EntityPage, IdentityService, ListQuery, RUN_LOG_LEVEL, StartRunRequest,
    StartRunResponse, WORKFLOW_ENGINE, WORKFLOW_TYPE, WorkflowService,
};
