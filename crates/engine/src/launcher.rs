//! Start-run request shaping.

use omics_run_api::{RUN_LOG_LEVEL, StartRunRequest, WORKFLOW_TYPE, WorkflowService};
use omics_run_types::{RunHandle, RunOptions};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::EngineError;

/// The resolved identifiers a run is started against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTarget {
    pub workflow_id: String,
    pub workflow_version_name: Option<String>,
    pub role_arn: String,
    pub output_uri: String,
}

/// Console link for a run in `region`.
pub fn console_url(region: &str, run_id: &str) -> String {
    format!("https://{region}.console.aws.amazon.com/omics/home?region={region}#/runs/{run_id}")
}

pub struct RunLauncher<'a> {
    service: &'a dyn WorkflowService,
}

impl<'a> RunLauncher<'a> {
    pub fn new(service: &'a dyn WorkflowService) -> Self {
        Self { service }
    }

    /// Compose the start-run body. Each call mints a fresh request id.
    pub fn build_request(target: &RunTarget, parameters: Map<String, Value>, options: RunOptions) -> StartRunRequest {
        StartRunRequest {
            output_uri: target.output_uri.clone(),
            parameters,
            role_arn: target.role_arn.clone(),
            workflow_id: target.workflow_id.clone(),
            workflow_version_name: target.workflow_version_name.clone(),
            workflow_type: WORKFLOW_TYPE.to_string(),
            log_level: RUN_LOG_LEVEL.to_string(),
            request_id: Uuid::new_v4().to_string(),
            options,
        }
    }

    pub async fn launch(&self, target: &RunTarget, parameters: Map<String, Value>, options: RunOptions) -> Result<RunHandle, EngineError> {
        let request = Self::build_request(target, parameters, options);
        info!(
            "starting run of workflow {}{}",
            target.workflow_id,
            target
                .workflow_version_name
                .as_deref()
                .map(|version| format!(" version {version}"))
                .unwrap_or_default()
        );
        let response = self.service.start_run(request).await?;
        let console_url = console_url(self.service.region(), &response.id);
        info!(
            "run {} started ({}): {console_url}",
            response.id,
            response.status.as_deref().unwrap_or("status unknown")
        );
        Ok(RunHandle {
            run_id: response.id,
            console_url,
        })
    }
}
