//! In-memory service fakes shared by the engine's unit tests.

use std::{
    collections::BTreeMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use omics_run_api::{
    ApiError, CreateWorkflowRequest, CreateWorkflowVersionRequest, EntityPage, IdentityService, ListQuery, StartRunRequest,
    StartRunResponse, WorkflowService,
};
use omics_run_types::{EntityStatus, RemoteEntity, ResourceKind};

use crate::poller::Sleeper;

/// Records sleeps instead of performing them.
#[derive(Debug, Default)]
pub(crate) struct CountingSleeper {
    sleeps: AtomicUsize,
    total_ms: AtomicUsize,
}

impl CountingSleeper {
    pub fn count(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> Duration {
        Duration::from_millis(self.total_ms.load(Ordering::SeqCst) as u64)
    }
}

#[async_trait]
impl Sleeper for CountingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.total_ms.fetch_add(duration.as_millis() as usize, Ordering::SeqCst);
    }
}

/// A workflow service backed by vectors, listing in insertion order.
#[derive(Default)]
pub(crate) struct FakeService {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    entities: Vec<(ResourceKind, RemoteEntity)>,
    versions: Vec<(String, RemoteEntity)>,
    page_size: Option<usize>,
    version_error: Option<ApiError>,
    racing_version_create: bool,
    next_id: u32,
    calls: Vec<String>,
    created_workflows: Vec<CreateWorkflowRequest>,
    created_versions: Vec<CreateWorkflowVersionRequest>,
    started_runs: Vec<StartRunRequest>,
}

impl FakeService {
    pub fn with_entity(self, kind: ResourceKind, entity: RemoteEntity) -> Self {
        self.state.lock().unwrap().entities.push((kind, entity));
        self
    }

    pub fn with_version(self, workflow_id: &str, version: RemoteEntity) -> Self {
        self.state.lock().unwrap().versions.push((workflow_id.to_string(), version));
        self
    }

    /// Split listings into pages of this size.
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.state.lock().unwrap().page_size = Some(page_size);
        self
    }

    /// Make the next version lookup fail with this error instead of answering.
    pub fn failing_version_lookup(self, error: ApiError) -> Self {
        self.state.lock().unwrap().version_error = Some(error);
        self
    }

    /// Make version creation lose a race: another caller's version appears
    /// and the create call answers with a conflict.
    pub fn racing_version_create(self) -> Self {
        self.state.lock().unwrap().racing_version_create = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|call| call.starts_with(prefix)).count()
    }

    pub fn created_workflows(&self) -> Vec<CreateWorkflowRequest> {
        self.state.lock().unwrap().created_workflows.clone()
    }

    pub fn created_versions(&self) -> Vec<CreateWorkflowVersionRequest> {
        self.state.lock().unwrap().created_versions.clone()
    }

    pub fn started_runs(&self) -> Vec<StartRunRequest> {
        self.state.lock().unwrap().started_runs.clone()
    }
}

#[async_trait]
impl WorkflowService for FakeService {
    fn region(&self) -> &str {
        "us-west-2"
    }

    async fn list_entities(&self, query: ListQuery<'_>) -> Result<EntityPage, ApiError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("list:{:?}:{}:{}", query.kind, query.name, query.starting_token.unwrap_or("")));
        let matching: Vec<RemoteEntity> = state
            .entities
            .iter()
            .filter(|(kind, entity)| *kind == query.kind && (query.kind == ResourceKind::RunCache || entity.name == query.name))
            .map(|(_, entity)| entity.clone())
            .collect();

        let start = query.starting_token.and_then(|token| token.parse::<usize>().ok()).unwrap_or(0);
        let size = state.page_size.unwrap_or(matching.len().max(1));
        let end = (start + size).min(matching.len());
        let items = matching.get(start..end).map(<[RemoteEntity]>::to_vec).unwrap_or_default();
        let next_token = (end < matching.len()).then(|| end.to_string());
        Ok(EntityPage { items, next_token })
    }

    async fn describe_entity(&self, kind: ResourceKind, id: &str) -> Result<RemoteEntity, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("describe:{kind:?}:{id}"));
        state
            .entities
            .iter()
            .find(|(k, entity)| *k == kind && entity.id == id)
            .map(|(_, entity)| entity.clone())
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("{kind} {id}"),
            })
    }

    async fn get_workflow_version(&self, workflow_id: &str, version_name: &str) -> Result<RemoteEntity, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("get_version:{workflow_id}:{version_name}"));
        if let Some(error) = state.version_error.take() {
            return Err(error);
        }
        state
            .versions
            .iter()
            .find(|(workflow, version)| workflow == workflow_id && version.id == version_name)
            .map(|(_, version)| version.clone())
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("workflow version {workflow_id}/{version_name}"),
            })
    }

    async fn create_workflow(&self, request: CreateWorkflowRequest) -> Result<String, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("wf-{}", state.next_id);
        state.calls.push(format!("create_workflow:{}", request.name));
        let mut entity = RemoteEntity::new(&id, &request.name).with_status(EntityStatus::Active);
        entity.tags = request.tags.clone();
        state.entities.push((ResourceKind::Workflow, entity));
        state.created_workflows.push(request);
        Ok(id)
    }

    async fn create_workflow_version(&self, request: CreateWorkflowVersionRequest) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("create_version:{}:{}", request.workflow_id, request.version_name));
        if state.racing_version_create {
            let winner = RemoteEntity::new(&request.version_name, &request.version_name).with_status(EntityStatus::Active);
            state.versions.push((request.workflow_id.clone(), winner));
            return Err(ApiError::Conflict {
                operation: "CreateWorkflowVersion",
                resource: format!("workflow {}", request.workflow_id),
                message: format!("Version {} already exists", request.version_name),
            });
        }
        let version = RemoteEntity::new(&request.version_name, &request.version_name).with_status(EntityStatus::Active);
        state.versions.push((request.workflow_id.clone(), version));
        state.created_versions.push(request);
        Ok(())
    }

    async fn start_run(&self, request: StartRunRequest) -> Result<StartRunResponse, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("start_run:{}", request.workflow_id));
        state.started_runs.push(request);
        Ok(StartRunResponse {
            id: "9876543".into(),
            arn: None,
            status: Some("PENDING".into()),
        })
    }
}

/// Role directory keyed by name.
#[derive(Default)]
pub(crate) struct FakeIdentity {
    roles: BTreeMap<String, String>,
}

impl FakeIdentity {
    pub fn with_role(mut self, name: &str, arn: &str) -> Self {
        self.roles.insert(name.to_string(), arn.to_string());
        self
    }
}

#[async_trait]
impl IdentityService for FakeIdentity {
    async fn get_role_arn(&self, role_name: &str) -> Result<String, ApiError> {
        self.roles.get(role_name).cloned().ok_or_else(|| ApiError::NotFound {
            resource: format!("IAM role {role_name}"),
        })
    }
}
