//! # omics-run engine
//!
//! Idempotent reconciliation of named remote resources against a service
//! that offers no atomic create-if-absent and happily stores duplicate names.
//!
//! ## Key Features
//!
//! - **Fingerprinting**: stable 16-character content identities
//! - **Name Resolution**: name to zero-or-one id, skipping FAILED/DELETED
//!   entries, with optional tag filtering and deterministic disambiguation
//! - **Reconciliation**: find-or-create for workflows and workflow versions
//! - **Readiness Polling**: waits for resources to leave their creating state
//! - **Run Launching**: composes a sparse start-run request
//!
//! ## Usage
//!
//! ```ignore
//! use omics_run_engine::{Reconciler, WorkflowDefinition};
//! use omics_run_types::LogicalResource;
//!
//! let mut definition = WorkflowDefinition::new("align.wdl", template, || package(&document));
//! let result = Reconciler::new(&omics)
//!     .ensure(&LogicalResource::workflow("align", fingerprint), &mut definition)
//!     .await?;
//! println!("{} {:?}", result.id, result.version_name);
//! ```
//!
//! ## Architecture
//!
//! - **`resolver`**: listing, filtering and disambiguation
//! - **`reconcile`**: find-or-create over workflows and versions
//! - **`poller`**: the readiness loop with an injectable sleeper
//! - **`launcher`**: start-run shaping and console links

pub mod error;
pub mod fingerprint;
pub mod launcher;
pub mod poller;
pub mod reconcile;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{EngineError, GENERIC_FAILURE_EXIT_CODE, RESOURCE_FAILURE_EXIT_CODE};
pub use fingerprint::{FINGERPRINT_LEN, FingerprintSource, fingerprint};
pub use launcher::{RunLauncher, RunTarget, console_url};
pub use poller::{ReadinessPoller, Sleeper, StatusBearing, TokioSleeper};
pub use reconcile::{Reconciler, WorkflowDefinition, WorkflowNaming, legacy_workflow_name, parameter_template_from_inputs};
pub use resolver::NameResolver;
