//! Change sets: the ordered mutations that reconcile one intent.

use crate::intent::Intent;
use crate::manifest::{Manifest, ObservedResource, ResourceRef};
use crate::merge;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One leaf-level difference between observed and desired state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Dotted path, with keyed list entries as `containers[name=web]`.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    pub new: Value,
}

impl FieldChange {
    pub fn new(path: impl Into<String>, old: Option<Value>, new: Value) -> Self {
        Self {
            path: path.into(),
            old,
            new,
        }
    }

    fn inverted(&self) -> Self {
        Self {
            path: self.path.clone(),
            old: Some(self.new.clone()),
            new: self.old.clone().unwrap_or(Value::Null),
        }
    }
}

/// Kind of change, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Create => write!(f, "create"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

/// An atomic mutation of one resource.
///
/// `expected_version` is the `resourceVersion` the change was computed
/// against; writers must refuse to apply it to any other version. `None`
/// means unconditional, which only compensating changes use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    Create {
        target: ResourceRef,
        manifest: Manifest,
    },
    Update {
        target: ResourceRef,
        expected_version: Option<String>,
        prior: Option<ObservedResource>,
        /// Strategic-merge patch over the manifest body.
        patch: Value,
        fields: Vec<FieldChange>,
    },
    Delete {
        target: ResourceRef,
        expected_version: Option<String>,
        prior: Option<ObservedResource>,
    },
}

impl Change {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::Create { .. } => ChangeKind::Create,
            Change::Update { .. } => ChangeKind::Update,
            Change::Delete { .. } => ChangeKind::Delete,
        }
    }

    pub fn target(&self) -> &ResourceRef {
        match self {
            Change::Create { target, .. }
            | Change::Update { target, .. }
            | Change::Delete { target, .. } => target,
        }
    }

    pub fn expected_version(&self) -> Option<&str> {
        match self {
            Change::Create { .. } => None,
            Change::Update {
                expected_version, ..
            }
            | Change::Delete {
                expected_version, ..
            } => expected_version.as_deref(),
        }
    }

    pub fn prior(&self) -> Option<&ObservedResource> {
        match self {
            Change::Create { .. } => None,
            Change::Update { prior, .. } | Change::Delete { prior, .. } => prior.as_ref(),
        }
    }

    /// Replica count before and after the change, when the change touches it.
    pub fn replica_transition(&self) -> Option<(Option<i64>, i64)> {
        let before = self.prior().and_then(|p| p.manifest.replicas());
        match self {
            Change::Create { manifest, .. } => manifest.replicas().map(|after| (None, after)),
            Change::Update { patch, .. } => patch
                .pointer("/spec/replicas")
                .and_then(Value::as_i64)
                .map(|after| (before, after)),
            Change::Delete { .. } => Some((before, 0)),
        }
    }

    /// Whether the change replaces a container image.
    pub fn changes_image(&self) -> bool {
        match self {
            Change::Update { fields, .. } => fields.iter().any(|f| {
                f.path.ends_with(".image") || f.path.ends_with(".containers")
            }),
            _ => false,
        }
    }

    /// One-line description for logs and audit details.
    pub fn describe(&self) -> String {
        match self {
            Change::Update { fields, .. } => {
                let paths: Vec<&str> = fields.iter().map(|f| f.path.as_str()).collect();
                format!("{} {} [{}]", self.kind(), self.target(), paths.join(", "))
            }
            _ => format!("{} {}", self.kind(), self.target()),
        }
    }

    /// The change that undoes this one once it has been applied.
    ///
    /// Returns `None` when the prior state needed to undo it was not captured.
    pub fn compensation(&self) -> Option<Change> {
        match self {
            Change::Create { target, .. } => Some(Change::Delete {
                target: target.clone(),
                expected_version: None,
                prior: None,
            }),
            Change::Update {
                target,
                prior,
                patch,
                fields,
                ..
            } => {
                let prior = prior.as_ref()?;
                Some(Change::Update {
                    target: target.clone(),
                    expected_version: None,
                    prior: None,
                    patch: merge::inverse_patch(patch, &prior.manifest.body()),
                    fields: fields.iter().map(FieldChange::inverted).collect(),
                })
            }
            Change::Delete { target, prior, .. } => {
                let prior = prior.as_ref()?;
                Some(Change::Create {
                    target: target.clone(),
                    manifest: prior.manifest.clone(),
                })
            }
        }
    }
}

/// Whether a change set may be executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChangeSetState {
    Ready,
    /// The snapshot cannot be trusted; re-fetch before proceeding.
    Conflict {
        resource: ResourceRef,
        reason: String,
    },
}

/// The minimal ordered set of changes reconciling one intent, computed
/// against one cluster snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: Uuid,
    pub intent: Intent,
    pub snapshot_taken_at: DateTime<Utc>,
    pub state: ChangeSetState,
    pub changes: Vec<Change>,
}

impl ChangeSet {
    /// Build a ready change set; changes are sorted into dependency order.
    pub fn new(intent: Intent, snapshot_taken_at: DateTime<Utc>, mut changes: Vec<Change>) -> Self {
        changes.sort_by_key(Change::kind);
        Self {
            id: Uuid::new_v4(),
            intent,
            snapshot_taken_at,
            state: ChangeSetState::Ready,
            changes,
        }
    }

    /// Build a change set that must not be executed.
    pub fn conflict(
        intent: Intent,
        snapshot_taken_at: DateTime<Utc>,
        resource: ResourceRef,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent,
            snapshot_taken_at,
            state: ChangeSetState::Conflict {
                resource,
                reason: reason.into(),
            },
            changes: Vec::new(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.state, ChangeSetState::Conflict { .. })
    }

    /// True for a ready change set with nothing to do.
    pub fn is_empty(&self) -> bool {
        !self.is_conflict() && self.changes.is_empty()
    }

    /// Changes in execution order: creates, then updates, then deletes.
    pub fn ordered(&self) -> Vec<&Change> {
        let mut ordered: Vec<&Change> = self.changes.iter().collect();
        ordered.sort_by_key(|c| c.kind());
        ordered
    }

    pub fn summary(&self) -> String {
        match &self.state {
            ChangeSetState::Conflict { resource, reason } => {
                format!("conflict on {}: {}", resource, reason)
            }
            ChangeSetState::Ready if self.changes.is_empty() => "no changes".to_string(),
            ChangeSetState::Ready => self
                .ordered()
                .iter()
                .map(|c| c.describe())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}
