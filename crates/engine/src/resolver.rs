//! Name resolution for remote resources.
//!
//! The remote service does not enforce name uniqueness, so a name can map to
//! several live entities when invocations race. Resolution filters out
//! FAILED/DELETED entries, optionally requires a tag, and when more than one
//! candidate survives picks the first in listing order with a warning.

use omics_run_api::{IdentityService, ListQuery, WorkflowService};
use omics_run_types::{RemoteEntity, ResourceKind, Tag};
use tracing::{debug, info, warn};

use crate::EngineError;

/// Resolves human names to remote identifiers.
#[derive(Clone, Copy)]
pub struct NameResolver<'a> {
    service: &'a dyn WorkflowService,
    identity: Option<&'a dyn IdentityService>,
}

impl<'a> NameResolver<'a> {
    pub fn new(service: &'a dyn WorkflowService) -> Self {
        Self { service, identity: None }
    }

    /// Enable role resolution through the identity service.
    pub fn with_identity(mut self, identity: &'a dyn IdentityService) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Resolve `name` to at most one identifier of `kind`.
    ///
    /// Returns `Ok(None)` when nothing qualifies; that is a normal outcome,
    /// not an error. Roles resolve to their ARN.
    pub async fn resolve(&self, kind: ResourceKind, name: &str, required_tag: Option<&Tag>) -> Result<Option<String>, EngineError> {
        match kind {
            ResourceKind::Role => return self.resolve_role(name).await,
            ResourceKind::WorkflowVersion => {
                return Err(EngineError::validation(
                    "workflow versions are fetched by workflow id and version name, not resolved by listing",
                ));
            }
            _ => {}
        }

        let mut candidates = self.live_candidates(kind, name).await?;
        if let Some(tag) = required_tag {
            candidates = self.retain_tagged(kind, candidates, tag).await?;
        }

        let count = candidates.len();
        let Some(chosen) = candidates.into_iter().next() else {
            debug!("no existing {kind} named {name}");
            return Ok(None);
        };
        if count > 1 {
            warn!(
                "multiple existing {kind}s named {name} ({count} candidates); using the first listed ({})",
                chosen.id
            );
        } else {
            info!("using existing {kind} id={} name={name}", chosen.id);
        }
        Ok(Some(chosen.id))
    }

    /// Page through the listing, keeping exact-name, reusable entries in
    /// listing order.
    async fn live_candidates(&self, kind: ResourceKind, name: &str) -> Result<Vec<RemoteEntity>, EngineError> {
        let mut candidates = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .service
                .list_entities(ListQuery {
                    kind,
                    name,
                    starting_token: next_token.as_deref(),
                })
                .await?;
            candidates.extend(
                page.items
                    .into_iter()
                    .filter(|entity| entity.name == name && entity.is_reusable()),
            );
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(candidates)
    }

    /// Keep candidates whose detail carries `tag`. Costs one detail call per
    /// candidate; entities that disappear or fail in the meantime are dropped.
    async fn retain_tagged(&self, kind: ResourceKind, candidates: Vec<RemoteEntity>, tag: &Tag) -> Result<Vec<RemoteEntity>, EngineError> {
        let mut tagged = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let detail = match self.service.describe_entity(kind, &candidate.id).await {
                Ok(detail) => detail,
                Err(error) if error.is_not_found() => continue,
                Err(error) => return Err(error.into()),
            };
            if detail.is_reusable() && detail.has_tag(tag) {
                tagged.push(candidate);
            } else {
                debug!("skipping {kind} {} without tag {tag}", candidate.id);
            }
        }
        Ok(tagged)
    }

    async fn resolve_role(&self, name: &str) -> Result<Option<String>, EngineError> {
        let identity = self
            .identity
            .ok_or_else(|| EngineError::validation("role lookup requires an identity service"))?;
        match identity.get_role_arn(name).await {
            Ok(arn) => {
                info!("resolved IAM role {name} to {arn}");
                Ok(Some(arn))
            }
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}
