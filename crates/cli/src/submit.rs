//! Submission orchestration: load, resolve references, reconcile, launch.

use anyhow::{Context, Result, anyhow};
use omics_run_api::{IdentityService, WorkflowService};
use omics_run_engine::{
    FingerprintSource, NameResolver, ReadinessPoller, Reconciler, RunLauncher, RunTarget, WorkflowDefinition, fingerprint,
    parameter_template_from_inputs,
};
use omics_run_types::{LogicalResource, ResourceKind, RunHandle, Tag};
use serde::Serialize;
use tracing::debug;

use crate::args::Args;

/// What gets printed on success.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub workflow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_version_name: Option<String>,
    #[serde(flatten)]
    pub run: Option<RunHandle>,
}

/// Remote references given on the command line, resolved to ids.
struct References {
    role_arn: Option<String>,
    run_group_id: Option<String>,
    cache_id: Option<String>,
}

pub async fn submit(args: &Args, service: &dyn WorkflowService, identity: &dyn IdentityService) -> Result<Submission> {
    args.validate()?;

    let document = omics_run_wdl::load(&args.wdl, &args.path)?;
    let executable = &document.executable;

    let parameters = if args.build {
        None
    } else {
        let inputs = omics_run_wdl::assemble(executable, &args.input_args())?;
        debug!("run inputs = {}", serde_json::Value::Object(inputs.clone()));
        Some(inputs)
    };

    // bad references should fail before anything is created
    let resolver = NameResolver::new(service).with_identity(identity);
    let references = resolve_references(args, &resolver).await?;

    let version = fingerprint(FingerprintSource::Digest(&document.content_digest));
    debug!(
        "WDL={} exe={} digest={}",
        document.main_file_name(),
        executable.name,
        document.content_digest
    );
    let resource = LogicalResource::workflow(executable.name.clone(), version).with_required_tag(Tag::owner());
    let template = parameter_template_from_inputs(&executable.available_inputs(), &executable.required_inputs());
    let mut definition = WorkflowDefinition::new(document.main_file_name(), template, || {
        omics_run_wdl::package(&document).map_err(anyhow::Error::from)
    });

    let poller = ReadinessPoller::default().with_max_wait(args.wait_timeout());
    let reconciled = Reconciler::new(service)
        .with_poller(poller)
        .with_naming(args.naming())
        .ensure(&resource, &mut definition)
        .await?;

    let Some(parameters) = parameters else {
        return Ok(Submission {
            workflow_id: reconciled.id,
            workflow_version_name: reconciled.version_name,
            run: None,
        });
    };

    let target = RunTarget {
        workflow_id: reconciled.id.clone(),
        workflow_version_name: reconciled.version_name.clone(),
        role_arn: references.role_arn.context("--role is required to start run")?,
        output_uri: args.output_uri.clone().context("--output-uri is required to start run")?,
    };
    let mut options = args.run_options();
    options.run_group_id = references.run_group_id;
    options.cache_id = references.cache_id;

    let handle = RunLauncher::new(service).launch(&target, parameters, options).await?;
    Ok(Submission {
        workflow_id: reconciled.id,
        workflow_version_name: reconciled.version_name,
        run: Some(handle),
    })
}

async fn resolve_references(args: &Args, resolver: &NameResolver<'_>) -> Result<References> {
    let role_arn = match args.role.as_deref() {
        Some(arn) if arn.starts_with("arn:") => Some(arn.to_string()),
        Some(name) => Some(lookup(resolver, ResourceKind::Role, name).await?),
        None => None,
    };
    let run_group_id = match args.run_group.as_deref() {
        Some(id) if is_numeric_id(id) => Some(id.to_string()),
        Some(name) => Some(lookup(resolver, ResourceKind::RunGroup, name).await?),
        None => None,
    };
    let cache_id = match args.cache.as_deref() {
        Some(id) if is_numeric_id(id) => Some(id.to_string()),
        Some(name) => Some(lookup(resolver, ResourceKind::RunCache, name).await?),
        None => None,
    };
    Ok(References {
        role_arn,
        run_group_id,
        cache_id,
    })
}

async fn lookup(resolver: &NameResolver<'_>, kind: ResourceKind, name: &str) -> Result<String> {
    resolver
        .resolve(kind, name, None)
        .await?
        .ok_or_else(|| anyhow!("{kind} {name} not found"))
}

fn is_numeric_id(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}
