//! # kintent-core
//!
//! Types shared by every kintent crate:
//!
//! - [`Intent`]: the validated request produced by an external front-end
//! - [`Manifest`], [`ManifestSet`], [`ObservedResource`], [`ClusterSnapshot`]
//! - [`Change`] and [`ChangeSet`]: the unit of work handed to the executor
//! - [`ClusterReader`] / [`ClusterWriter`]: the seams to the real cluster
//! - [`merge`]: subset diffing and strategic-merge patch helpers
//! - [`config`]: YAML configuration for the whole workspace

pub mod change;
pub mod cluster;
pub mod config;
pub mod error;
pub mod intent;
pub mod manifest;
pub mod merge;

pub use change::{Change, ChangeKind, ChangeSet, ChangeSetState, FieldChange};
pub use cluster::{ClassifiedError, ClusterReader, ClusterWriter};
pub use config::{
    ApprovalPolicy, ApprovalRule, AuditConfig, ClusterConfig, ConfigError, KintentConfig,
    ReconcileConfig, RiskCondition, Verdict,
};
pub use error::{IntentError, ManifestError};
pub use intent::{Action, Intent, IntentSpec};
pub use manifest::{
    ClusterSnapshot, DesiredResource, Manifest, ManifestSet, ObjectMeta, ObservedResource,
    ResourceKind, ResourceRef,
};
