//! Cluster collaborator traits.
//!
//! The reconcile core never talks to a cluster directly. Adapters implement
//! these traits and classify every transport failure into a
//! [`ClassifiedError`] so the executor can decide between retry and rollback.

use crate::change::Change;
use crate::manifest::{ObservedResource, ResourceRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A cluster-side failure, classified by the adapter that saw it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "class", content = "message", rename_all = "snake_case")]
pub enum ClassifiedError {
    /// Transient: throttling, timeouts, unavailable API server.
    #[error("retryable cluster error: {0}")]
    Retryable(String),

    /// Permanent: validation failures, forbidden, not found on update.
    #[error("fatal cluster error: {0}")]
    Fatal(String),

    /// The resource changed since it was observed; re-diff before retrying.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl ClassifiedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClassifiedError::Retryable(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClassifiedError::Conflict(_))
    }
}

/// Read access to live cluster state.
#[async_trait]
pub trait ClusterReader: Send + Sync {
    /// Fetch one resource; `Ok(None)` means it does not exist.
    async fn get(&self, target: &ResourceRef) -> Result<Option<ObservedResource>, ClassifiedError>;
}

/// Write access to the cluster.
#[async_trait]
pub trait ClusterWriter: Send + Sync {
    /// Apply one change, honouring its `expected_version` precondition.
    async fn apply(&self, change: &Change) -> Result<(), ClassifiedError>;
}
