//! Service seams consumed by the reconciliation engine.
//!
//! The engine only talks to these traits, which keeps it testable against
//! in-memory fakes and keeps HTTP details inside this crate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine as _;
use omics_run_types::{ParameterTemplate, RemoteEntity, ResourceKind, RunOptions};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::ApiError;

/// Workflow engine declared for created workflows.
pub const WORKFLOW_ENGINE: &str = "WDL";
/// Workflow type used for listings and run starts.
pub const WORKFLOW_TYPE: &str = "PRIVATE";
/// Run log level requested for every run.
pub const RUN_LOG_LEVEL: &str = "ALL";

/// One page of a name-filtered listing.
#[derive(Debug, Clone, Copy)]
pub struct ListQuery<'a> {
    pub kind: ResourceKind,
    pub name: &'a str,
    pub starting_token: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct EntityPage {
    pub items: Vec<RemoteEntity>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub engine: String,
    #[serde(serialize_with = "serialize_blob")]
    pub definition_zip: Vec<u8>,
    pub main: String,
    pub parameter_template: ParameterTemplate,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowVersionRequest {
    #[serde(skip)]
    pub workflow_id: String,
    pub version_name: String,
    pub engine: String,
    #[serde(serialize_with = "serialize_blob")]
    pub definition_zip: Vec<u8>,
    pub main: String,
    pub parameter_template: ParameterTemplate,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub request_id: String,
}

/// Body of a start-run call. Optional settings are flattened in and only
/// present when set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    pub output_uri: String,
    pub parameters: Map<String, Value>,
    pub role_arn: String,
    pub workflow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_version_name: Option<String>,
    pub workflow_type: String,
    pub log_level: String,
    pub request_id: String,
    #[serde(flatten)]
    pub options: RunOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunResponse {
    pub id: String,
    #[serde(default)]
    pub arn: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

fn serialize_blob<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// The remote workflow-execution service.
#[async_trait]
pub trait WorkflowService: Send + Sync {
    /// Region the service is addressed in, used for console links.
    fn region(&self) -> &str;

    /// One page of entities of `kind` whose name matches `query.name`.
    ///
    /// Kinds whose listing cannot filter by name may return other names; the
    /// caller applies exact-name filtering.
    async fn list_entities(&self, query: ListQuery<'_>) -> Result<EntityPage, ApiError>;

    /// Full detail (status message, tags) of one entity.
    async fn describe_entity(&self, kind: ResourceKind, id: &str) -> Result<RemoteEntity, ApiError>;

    /// Fetch a specific workflow version; absent versions yield
    /// [`ApiError::NotFound`]. The returned entity's id is the version name.
    async fn get_workflow_version(&self, workflow_id: &str, version_name: &str) -> Result<RemoteEntity, ApiError>;

    /// Create a workflow and return its id.
    async fn create_workflow(&self, request: CreateWorkflowRequest) -> Result<String, ApiError>;

    async fn create_workflow_version(&self, request: CreateWorkflowVersionRequest) -> Result<(), ApiError>;

    async fn start_run(&self, request: StartRunRequest) -> Result<StartRunResponse, ApiError>;
}

/// The identity service that owns IAM roles.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// ARN of the named role; absent roles yield [`ApiError::NotFound`].
    async fn get_role_arn(&self, role_name: &str) -> Result<String, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use omics_run_types::ParameterSpec;

    #[test]
    fn create_workflow_body_encodes_definition_as_base64() {
        let mut parameter_template = ParameterTemplate::new();
        parameter_template.insert(
            "reads".into(),
            ParameterSpec {
                description: "reads".into(),
                optional: false,
            },
        );
        let request = CreateWorkflowRequest {
            name: "align".into(),
            engine: WORKFLOW_ENGINE.into(),
            definition_zip: b"PK".to_vec(),
            main: "align.wdl".into(),
            parameter_template,
            tags: BTreeMap::new(),
            request_id: "req-1".into(),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["definitionZip"], "UEs=");
        assert_eq!(body["parameterTemplate"]["reads"]["optional"], false);
        assert!(body.get("tags").is_none());
    }

    #[test]
    fn version_body_omits_workflow_id() {
        let request = CreateWorkflowVersionRequest {
            workflow_id: "1234567".into(),
            version_name: "0123456789abcdef".into(),
            engine: WORKFLOW_ENGINE.into(),
            definition_zip: Vec::new(),
            main: "align.wdl".into(),
            parameter_template: ParameterTemplate::new(),
            tags: BTreeMap::new(),
            request_id: "req-2".into(),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("workflowId").is_none());
        assert_eq!(body["versionName"], "0123456789abcdef");
    }
}
