//! Shared type definitions for omics-run.
//!
//! These types describe the remote named resources the tool reconciles
//! against (workflows, workflow versions, run groups, run caches and IAM
//! roles) as well as the values produced when a run is started. They carry no
//! behavior beyond small helpers so that every crate in the workspace can
//! depend on them without pulling in the HTTP stack.

use std::{collections::BTreeMap, fmt};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub mod options;

pub use options::{CacheBehavior, OptionParseError, RetentionMode, RunOptions, StorageType};

/// Tag key stamped on every workflow this tool creates.
pub const OWNER_TAG_KEY: &str = "CreatedBy";
/// Tag value paired with [`OWNER_TAG_KEY`].
pub const OWNER_TAG_VALUE: &str = "omics-run";

/// The kinds of remote resource the tool resolves or reconciles.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ResourceKind {
    Workflow,
    WorkflowVersion,
    RunGroup,
    RunCache,
    Role,
}

impl ResourceKind {
    /// Human-readable label used in log lines and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::WorkflowVersion => "workflow version",
            Self::RunGroup => "run group",
            Self::RunCache => "run cache",
            Self::Role => "IAM role",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle status reported by the remote service.
///
/// Statuses the tool does not know about are preserved verbatim in
/// [`EntityStatus::Other`] so they can still be logged.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityStatus {
    Creating,
    Active,
    Updating,
    Inactive,
    Failed,
    Deleted,
    Other(String),
}

impl EntityStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "CREATING",
            Self::Active => "ACTIVE",
            Self::Updating => "UPDATING",
            Self::Inactive => "INACTIVE",
            Self::Failed => "FAILED",
            Self::Deleted => "DELETED",
            Self::Other(raw) => raw.as_str(),
        }
    }

    /// FAILED and DELETED entities are never candidates for reuse.
    pub fn is_reusable(&self) -> bool {
        !matches!(self, Self::Failed | Self::Deleted)
    }
}

impl From<&str> for EntityStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "CREATING" => Self::Creating,
            "ACTIVE" => Self::Active,
            "UPDATING" => Self::Updating,
            "INACTIVE" => Self::Inactive,
            "FAILED" => Self::Failed,
            "DELETED" => Self::Deleted,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for EntityStatus {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<EntityStatus> for String {
    fn from(status: EntityStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single key/value resource tag.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The ownership tag marking workflows created by this tool.
    pub fn owner() -> Self {
        Self::new(OWNER_TAG_KEY, OWNER_TAG_VALUE)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// A remote resource as observed through list or get calls.
///
/// Listing calls typically omit `status_message` and `tags`; detail calls
/// fill them in. Run groups carry no status at all, which the tool treats as
/// live.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EntityStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl RemoteEntity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: EntityStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_tag(mut self, tag: &Tag) -> Self {
        self.tags.insert(tag.key.clone(), tag.value.clone());
        self
    }

    /// Whether the entity may be reused; entities without a status are live.
    pub fn is_reusable(&self) -> bool {
        self.status.as_ref().is_none_or(EntityStatus::is_reusable)
    }

    /// Whether the tag map contains exactly this key/value pair.
    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.get(&tag.key).is_some_and(|value| value == &tag.value)
    }
}

/// Desired remote resource, identified by kind, human name and (optionally) a
/// content fingerprint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogicalResource {
    pub kind: ResourceKind,
    pub name: String,
    pub fingerprint: Option<String>,
    pub required_tag: Option<Tag>,
}

impl LogicalResource {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            fingerprint: None,
            required_tag: None,
        }
    }

    pub fn workflow(name: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self::new(ResourceKind::Workflow, name).with_fingerprint(fingerprint)
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_required_tag(mut self, tag: Tag) -> Self {
        self.required_tag = Some(tag);
        self
    }

    /// Reconciliation identity: `kind/name` or `kind/name@fingerprint`.
    pub fn identity_key(&self) -> String {
        match &self.fingerprint {
            Some(fingerprint) => format!("{:?}/{}@{}", self.kind, self.name, fingerprint),
            None => format!("{:?}/{}", self.kind, self.name),
        }
    }
}

/// Outcome of reconciling one logical resource.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    pub created: bool,
}

/// One entry of a workflow's declared parameter template.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub description: String,
    pub optional: bool,
}

/// Parameter template keyed by input name, in declaration order.
pub type ParameterTemplate = IndexMap<String, ParameterSpec>;

/// Identifiers of a started run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHandle {
    pub run_id: String,
    #[serde(rename = "runConsole")]
    pub console_url: String,
}
