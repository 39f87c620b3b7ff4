//! HealthOmics workflows REST client.

use std::collections::BTreeMap;

use async_trait::async_trait;
use omics_run_types::{EntityStatus, RemoteEntity, ResourceKind};
use serde::Deserialize;
use tracing::debug;

use crate::{
    ApiError, AwsConfig,
    service::{
        CreateWorkflowRequest, CreateWorkflowVersionRequest, EntityPage, ListQuery, StartRunRequest, StartRunResponse, WORKFLOW_TYPE,
        WorkflowService,
    },
    transport::{SignedRequest, SignedTransport, decode},
};

/// Service name used in the SigV4 credential scope.
const SIGNING_SERVICE: &str = "omics";
const PAGE_SIZE: &str = "100";

/// Entity shape shared by list items and detail responses.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEntity {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version_name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    tags: Option<BTreeMap<String, String>>,
}

impl WireEntity {
    fn into_entity(self) -> RemoteEntity {
        let name = self.name.or_else(|| self.version_name.clone()).unwrap_or_default();
        RemoteEntity {
            id: self.id.or(self.version_name).unwrap_or_default(),
            name,
            status: self.status.map(EntityStatus::from),
            status_message: self.status_message,
            tags: self.tags.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePage {
    #[serde(default)]
    items: Vec<WireEntity>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedWorkflow {
    id: String,
}

/// Client for the HealthOmics workflow, run group, run cache and run APIs.
#[derive(Debug, Clone)]
pub struct OmicsClient {
    transport: SignedTransport,
    region: String,
}

impl OmicsClient {
    pub fn new(config: &AwsConfig) -> Result<Self, ApiError> {
        let transport = SignedTransport::new(config, config.omics_endpoint.clone(), config.region.clone(), SIGNING_SERVICE)?;
        Ok(Self {
            transport,
            region: config.region.clone(),
        })
    }
}

fn collection_path(kind: ResourceKind) -> Result<&'static str, ApiError> {
    match kind {
        ResourceKind::Workflow => Ok("/workflow"),
        ResourceKind::RunGroup => Ok("/runGroup"),
        ResourceKind::RunCache => Ok("/runCache"),
        ResourceKind::WorkflowVersion | ResourceKind::Role => {
            Err(ApiError::Config(format!("{kind} is not addressable through the workflows API")))
        }
    }
}

fn operation_names(kind: ResourceKind) -> (&'static str, &'static str) {
    match kind {
        ResourceKind::Workflow => ("ListWorkflows", "GetWorkflow"),
        ResourceKind::RunGroup => ("ListRunGroups", "GetRunGroup"),
        ResourceKind::RunCache => ("ListRunCaches", "GetRunCache"),
        ResourceKind::WorkflowVersion => ("ListWorkflowVersions", "GetWorkflowVersion"),
        ResourceKind::Role => ("ListRoles", "GetRole"),
    }
}

#[async_trait]
impl WorkflowService for OmicsClient {
    fn region(&self) -> &str {
        &self.region
    }

    async fn list_entities(&self, query: ListQuery<'_>) -> Result<EntityPage, ApiError> {
        let path = collection_path(query.kind)?;
        let (operation, _) = operation_names(query.kind);
        let mut request = SignedRequest::get(operation, format!("{} listing", query.kind), path).query("maxResults", PAGE_SIZE);
        match query.kind {
            ResourceKind::Workflow => request = request.query("name", query.name).query("type", WORKFLOW_TYPE),
            ResourceKind::RunGroup => request = request.query("name", query.name),
            // the run cache listing has no name filter
            _ => {}
        }
        if let Some(token) = query.starting_token {
            request = request.query("startingToken", token);
        }

        let page: WirePage = decode(operation, &self.transport.send(request).await?)?;
        debug!(operation, items = page.items.len(), more = page.next_token.is_some(), "listed page");
        Ok(EntityPage {
            items: page.items.into_iter().map(WireEntity::into_entity).collect(),
            next_token: page.next_token.filter(|token| !token.is_empty()),
        })
    }

    async fn describe_entity(&self, kind: ResourceKind, id: &str) -> Result<RemoteEntity, ApiError> {
        let path = format!("{}/{id}", collection_path(kind)?);
        let (_, operation) = operation_names(kind);
        let mut request = SignedRequest::get(operation, format!("{kind} {id}"), path);
        if kind == ResourceKind::Workflow {
            request = request.query("type", WORKFLOW_TYPE);
        }
        let wire: WireEntity = decode(operation, &self.transport.send(request).await?)?;
        let mut entity = wire.into_entity();
        if entity.id.is_empty() {
            entity.id = id.to_string();
        }
        Ok(entity)
    }

    async fn get_workflow_version(&self, workflow_id: &str, version_name: &str) -> Result<RemoteEntity, ApiError> {
        let operation = "GetWorkflowVersion";
        let request = SignedRequest::get(
            operation,
            format!("workflow version {workflow_id}/{version_name}"),
            format!("/workflow/{workflow_id}/version/{version_name}"),
        )
        .query("type", WORKFLOW_TYPE);
        let wire: WireEntity = decode(operation, &self.transport.send(request).await?)?;
        let mut entity = wire.into_entity();
        // versions are addressed by name; the response id is the parent workflow's
        entity.id = version_name.to_string();
        entity.name = version_name.to_string();
        Ok(entity)
    }

    async fn create_workflow(&self, request: CreateWorkflowRequest) -> Result<String, ApiError> {
        let operation = "CreateWorkflow";
        let body = serde_json::to_vec(&request).map_err(|source| ApiError::Decode { operation, source })?;
        let signed = SignedRequest::post_json(operation, format!("workflow {}", request.name), "/workflow", body);
        let created: CreatedWorkflow = decode(operation, &self.transport.send(signed).await?)?;
        Ok(created.id)
    }

    async fn create_workflow_version(&self, request: CreateWorkflowVersionRequest) -> Result<(), ApiError> {
        let operation = "CreateWorkflowVersion";
        let body = serde_json::to_vec(&request).map_err(|source| ApiError::Decode { operation, source })?;
        let signed = SignedRequest::post_json(
            operation,
            format!("workflow {}", request.workflow_id),
            format!("/workflow/{}/version", request.workflow_id),
            body,
        );
        self.transport.send(signed).await?;
        Ok(())
    }

    async fn start_run(&self, request: StartRunRequest) -> Result<StartRunResponse, ApiError> {
        let operation = "StartRun";
        let body = serde_json::to_vec(&request).map_err(|source| ApiError::Decode { operation, source })?;
        let signed = SignedRequest::post_json(operation, format!("workflow {}", request.workflow_id), "/run", body);
        decode(operation, &self.transport.send(signed).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_detail_uses_version_name_as_name() {
        let wire: WireEntity = serde_json::from_value(serde_json::json!({
            "workflowId": "1234567",
            "versionName": "0123456789abcdef",
            "status": "CREATING"
        }))
        .unwrap();
        let entity = wire.into_entity();
        assert_eq!(entity.id, "0123456789abcdef");
        assert_eq!(entity.name, "0123456789abcdef");
        assert_eq!(entity.status, Some(EntityStatus::Creating));
    }

    #[test]
    fn run_groups_may_omit_status() {
        let wire: WireEntity = serde_json::from_value(serde_json::json!({"id": "7654321", "name": "batch"})).unwrap();
        let entity = wire.into_entity();
        assert!(entity.status.is_none());
        assert!(entity.is_reusable());
    }

    #[test]
    fn versions_and_roles_have_no_collection() {
        assert!(collection_path(ResourceKind::WorkflowVersion).is_err());
        assert!(collection_path(ResourceKind::Role).is_err());
        assert_eq!(collection_path(ResourceKind::RunCache).unwrap(), "/runCache");
    }
}
