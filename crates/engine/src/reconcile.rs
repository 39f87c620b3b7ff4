//! Find-or-create reconciliation of workflows and workflow versions.
//!
//! The remote API has no atomic create-if-absent, so every step is "look,
//! then create when absent, then wait for readiness". Workflow names are
//! reused across definitions (versioned naming, the default) or carry the
//! fingerprint in the name itself (legacy naming). Either way, a fingerprint
//! that has been published is never updated in place.

use std::collections::BTreeMap;

use omics_run_api::{CreateWorkflowRequest, CreateWorkflowVersionRequest, WORKFLOW_ENGINE, WorkflowService};
use omics_run_types::{LogicalResource, ParameterSpec, ParameterTemplate, ReconciliationResult, ResourceKind, Tag};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{EngineError, NameResolver, ReadinessPoller};

/// Longest base name kept by legacy naming before the fingerprint suffix.
const LEGACY_NAME_PREFIX_CHARS: usize = 111;
const LEGACY_FINGERPRINT_CHARS: usize = 16;

/// How a definition's fingerprint maps onto remote names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkflowNaming {
    /// One workflow per name, one version per fingerprint.
    #[default]
    Versioned,
    /// One workflow per fingerprint, named `name.fingerprint`; no versions.
    Legacy,
}

/// The pieces of a workflow definition the remote create calls need.
///
/// Packaging is deferred until a create is actually required and then built
/// at most once per reconciliation.
pub struct WorkflowDefinition<F> {
    pub main_file: String,
    pub parameter_template: ParameterTemplate,
    supplier: Option<F>,
    package: Option<Vec<u8>>,
}

impl<F> WorkflowDefinition<F>
where
    F: FnOnce() -> anyhow::Result<Vec<u8>>,
{
    pub fn new(main_file: impl Into<String>, parameter_template: ParameterTemplate, supplier: F) -> Self {
        Self {
            main_file: main_file.into(),
            parameter_template,
            supplier: Some(supplier),
            package: None,
        }
    }

    /// Whether the package supplier has run.
    pub fn is_packaged(&self) -> bool {
        self.package.is_some()
    }

    fn package(&mut self) -> Result<Vec<u8>, EngineError> {
        if let Some(package) = &self.package {
            return Ok(package.clone());
        }
        let supplier = self
            .supplier
            .take()
            .ok_or_else(|| EngineError::validation("workflow package supplier already consumed"))?;
        let package = supplier().map_err(EngineError::Definition)?;
        debug!("packaged workflow definition ({} bytes)", package.len());
        self.package = Some(package.clone());
        Ok(package)
    }
}

/// Build the parameter template declared on created workflows: every
/// available input, optional unless it is required.
pub fn parameter_template_from_inputs<S: AsRef<str>>(available: &[S], required: &[S]) -> ParameterTemplate {
    available
        .iter()
        .map(|name| {
            let name = name.as_ref();
            let optional = !required.iter().any(|candidate| candidate.as_ref() == name);
            (
                name.to_string(),
                ParameterSpec {
                    description: name.to_string(),
                    optional,
                },
            )
        })
        .collect()
}

/// Remote workflow name used by legacy naming.
pub fn legacy_workflow_name(name: &str, fingerprint: &str) -> String {
    let base: String = name.chars().take(LEGACY_NAME_PREFIX_CHARS).collect();
    let suffix: String = fingerprint.chars().take(LEGACY_FINGERPRINT_CHARS).collect();
    format!("{base}.{suffix}")
}

/// The two reconcilable shapes: a workflow found by name (and tag), or a
/// version found by workflow id and label.
#[derive(Clone, Copy)]
enum Target<'t> {
    Workflow { name: &'t str, required_tag: Option<&'t Tag> },
    Version { workflow_id: &'t str, version_name: &'t str },
}

impl Target<'_> {
    fn describe(&self, id: &str) -> String {
        match self {
            Self::Workflow { name, .. } => format!("workflow {id} ({name})"),
            Self::Version { workflow_id, .. } => format!("workflow {workflow_id} version {id}"),
        }
    }
}

/// Reconciles logical workflows against the remote service.
pub struct Reconciler<'a> {
    service: &'a dyn WorkflowService,
    poller: ReadinessPoller,
    naming: WorkflowNaming,
}

impl<'a> Reconciler<'a> {
    pub fn new(service: &'a dyn WorkflowService) -> Self {
        Self {
            service,
            poller: ReadinessPoller::default(),
            naming: WorkflowNaming::default(),
        }
    }

    pub fn with_poller(mut self, poller: ReadinessPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_naming(mut self, naming: WorkflowNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Ensure a ready remote workflow (and, under versioned naming, a ready
    /// version) exists for `resource`, creating whatever is missing.
    pub async fn ensure<F>(&self, resource: &LogicalResource, definition: &mut WorkflowDefinition<F>) -> Result<ReconciliationResult, EngineError>
    where
        F: FnOnce() -> anyhow::Result<Vec<u8>>,
    {
        if resource.kind != ResourceKind::Workflow {
            return Err(EngineError::validation(format!("cannot reconcile a {}; only workflows are created", resource.kind)));
        }
        let fingerprint = resource
            .fingerprint
            .as_deref()
            .ok_or_else(|| EngineError::validation(format!("workflow {} has no fingerprint", resource.name)))?;
        debug!("reconciling {}", resource.identity_key());

        match self.naming {
            WorkflowNaming::Versioned => {
                let owner = resource.required_tag.clone().unwrap_or_else(Tag::owner);
                let workflow = Target::Workflow {
                    name: &resource.name,
                    required_tag: Some(&owner),
                };
                let (workflow_id, workflow_created) = self.find_or_create(workflow, definition).await?;
                let version = Target::Version {
                    workflow_id: &workflow_id,
                    version_name: fingerprint,
                };
                let (version_name, version_created) = self.find_or_create(version, definition).await?;
                Ok(ReconciliationResult {
                    id: workflow_id,
                    version_name: Some(version_name),
                    created: workflow_created || version_created,
                })
            }
            WorkflowNaming::Legacy => {
                let name = legacy_workflow_name(&resource.name, fingerprint);
                let workflow = Target::Workflow {
                    name: &name,
                    required_tag: None,
                };
                let (workflow_id, created) = self.find_or_create(workflow, definition).await?;
                Ok(ReconciliationResult {
                    id: workflow_id,
                    version_name: None,
                    created,
                })
            }
        }
    }

    async fn find_or_create<F>(&self, target: Target<'_>, definition: &mut WorkflowDefinition<F>) -> Result<(String, bool), EngineError>
    where
        F: FnOnce() -> anyhow::Result<Vec<u8>>,
    {
        let existing = match target {
            Target::Workflow { name, required_tag } => {
                NameResolver::new(self.service)
                    .resolve(ResourceKind::Workflow, name, required_tag)
                    .await?
            }
            Target::Version {
                workflow_id,
                version_name,
            } => match self.service.get_workflow_version(workflow_id, version_name).await {
                Ok(version) => Some(version.id),
                Err(error) if error.is_not_found() => None,
                Err(error) => return Err(error.into()),
            },
        };

        let (id, created) = match existing {
            Some(id) => (id, false),
            None => match self.create(target, definition).await {
                Ok(id) => (id, true),
                // a concurrent submission published the same fingerprint first
                Err(EngineError::Api(error)) if error.is_conflict() => match target {
                    Target::Version { version_name, .. } => {
                        info!("{} was created concurrently; waiting for it", target.describe(version_name));
                        (version_name.to_string(), false)
                    }
                    Target::Workflow { .. } => return Err(error.into()),
                },
                Err(error) => return Err(error),
            },
        };
        self.await_ready(target, &id).await?;
        Ok((id, created))
    }

    async fn create<F>(&self, target: Target<'_>, definition: &mut WorkflowDefinition<F>) -> Result<String, EngineError>
    where
        F: FnOnce() -> anyhow::Result<Vec<u8>>,
    {
        let definition_zip = definition.package()?;
        let tags: BTreeMap<String, String> = [Tag::owner()].into_iter().map(|tag| (tag.key, tag.value)).collect();
        let request_id = Uuid::new_v4().to_string();

        match target {
            Target::Workflow { name, .. } => {
                info!("creating workflow {name}");
                let id = self
                    .service
                    .create_workflow(CreateWorkflowRequest {
                        name: name.to_string(),
                        engine: WORKFLOW_ENGINE.to_string(),
                        definition_zip,
                        main: definition.main_file.clone(),
                        parameter_template: definition.parameter_template.clone(),
                        tags,
                        request_id,
                    })
                    .await?;
                info!("created workflow {name} id={id}");
                Ok(id)
            }
            Target::Version {
                workflow_id,
                version_name,
            } => {
                info!("creating workflow {workflow_id} version {version_name}");
                self.service
                    .create_workflow_version(CreateWorkflowVersionRequest {
                        workflow_id: workflow_id.to_string(),
                        version_name: version_name.to_string(),
                        engine: WORKFLOW_ENGINE.to_string(),
                        definition_zip,
                        main: definition.main_file.clone(),
                        parameter_template: definition.parameter_template.clone(),
                        tags,
                        request_id,
                    })
                    .await?;
                Ok(version_name.to_string())
            }
        }
    }

    async fn await_ready(&self, target: Target<'_>, id: &str) -> Result<(), EngineError> {
        let description = target.describe(id);
        let service = self.service;
        match target {
            Target::Workflow { .. } => {
                self.poller
                    .await_ready(&description, move || service.describe_entity(ResourceKind::Workflow, id))
                    .await?;
            }
            Target::Version { workflow_id, .. } => {
                self.poller
                    .await_ready(&description, move || service.get_workflow_version(workflow_id, id))
                    .await?;
            }
        }
        info!("{description} is ready");
        Ok(())
    }
}
