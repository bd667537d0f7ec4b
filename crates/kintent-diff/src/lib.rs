//! # kintent-diff
//!
//! Computes the minimal [`ChangeSet`] that moves observed cluster state to the
//! state a [`ManifestSet`] describes.
//!
//! [`diff`] is pure and works on an existing [`ClusterSnapshot`].
//! [`DiffEngine::plan`] takes the snapshot itself through a [`ClusterReader`].

use kintent_core::merge;
use kintent_core::{
    Change, ChangeSet, ClassifiedError, ClusterReader, ClusterSnapshot, DesiredResource,
    ManifestSet, ObservedResource, ResourceRef,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiffError {
    /// A patch was requested for a resource that does not exist.
    #[error("cannot patch {0}: resource does not exist")]
    TargetMissing(ResourceRef),

    /// The snapshot has no entry for a resource the manifest set names.
    #[error("snapshot does not cover {0}")]
    NotObserved(ResourceRef),

    #[error("failed to read cluster state: {0}")]
    Cluster(#[from] ClassifiedError),
}

/// Diff `desired` against `observed`.
///
/// A resource that is mid-rollout or terminating turns the whole result into
/// a conflict change set, regardless of what else would have been emitted.
pub fn diff(desired: &ManifestSet, observed: &ClusterSnapshot) -> Result<ChangeSet, DiffError> {
    let mut current = Vec::with_capacity(desired.resources.len());
    for resource in &desired.resources {
        let target = resource.resource_ref();
        let entry = observed
            .resources
            .get(&target)
            .ok_or_else(|| DiffError::NotObserved(target.clone()))?;
        current.push((resource, entry.as_ref()));
    }

    for (resource, entry) in &current {
        if let Some(reason) = entry.and_then(ObservedResource::conflict_reason) {
            let target = resource.resource_ref();
            tracing::warn!(target = %target, reason = %reason, "Observed state is not stable");
            return Ok(ChangeSet::conflict(
                desired.intent.clone(),
                observed.taken_at,
                target,
                reason,
            ));
        }
    }

    let mut changes = Vec::new();
    for (resource, entry) in current {
        if let Some(change) = diff_resource(resource, entry)? {
            changes.push(change);
        }
    }

    Ok(ChangeSet::new(desired.intent.clone(), observed.taken_at, changes))
}

fn diff_resource(
    desired: &DesiredResource,
    observed: Option<&ObservedResource>,
) -> Result<Option<Change>, DiffError> {
    match (desired, observed) {
        (DesiredResource::Apply(manifest), None) => Ok(Some(Change::Create {
            target: manifest.resource_ref(),
            manifest: manifest.clone(),
        })),
        (DesiredResource::Patch(manifest), None) => {
            Err(DiffError::TargetMissing(manifest.resource_ref()))
        }
        (DesiredResource::Apply(manifest) | DesiredResource::Patch(manifest), Some(current)) => {
            let (patch, fields) = merge::subset_patch(&manifest.body(), &current.manifest.body());
            Ok(patch.map(|patch| Change::Update {
                target: manifest.resource_ref(),
                expected_version: Some(current.resource_version.clone()),
                prior: Some(current.clone()),
                patch,
                fields,
            }))
        }
        (DesiredResource::Absent(target), Some(current)) => Ok(Some(Change::Delete {
            target: target.clone(),
            expected_version: Some(current.resource_version.clone()),
            prior: Some(current.clone()),
        })),
        (DesiredResource::Absent(_), None) => Ok(None),
    }
}

/// Plans change sets against live cluster state.
#[derive(Clone)]
pub struct DiffEngine {
    reader: Arc<dyn ClusterReader>,
}

impl DiffEngine {
    pub fn new(reader: Arc<dyn ClusterReader>) -> Self {
        Self { reader }
    }

    /// Read every resource `desired` names into a fresh snapshot.
    pub async fn snapshot(&self, desired: &ManifestSet) -> Result<ClusterSnapshot, ClassifiedError> {
        let mut snapshot = ClusterSnapshot::new();
        for target in desired.resource_refs() {
            let observed = self.reader.get(&target).await?;
            snapshot.record(target, observed);
        }
        Ok(snapshot)
    }

    /// Snapshot the cluster and diff against it.
    pub async fn plan(&self, desired: &ManifestSet) -> Result<ChangeSet, DiffError> {
        let snapshot = self.snapshot(desired).await?;
        let change_set = diff(desired, &snapshot)?;
        tracing::info!(
            intent_id = %desired.intent.id(),
            changeset_id = %change_set.id,
            changes = change_set.changes.len(),
            conflict = change_set.is_conflict(),
            "Planned change set"
        );
        Ok(change_set)
    }
}
