//! Audit record types.
//!
//! One [`AuditRecord`] is written for every change set that reaches the
//! executor, whatever the result. Records are immutable once appended;
//! `sequence` and `recorded_at` are assigned by the log at append time.

use chrono::{DateTime, Utc};
use kintent_core::{ChangeKind, ChangeSet, Intent, ResourceRef};
use kintent_policy::ApprovalDecision;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final result of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every change applied (or there was nothing to do).
    Success,
    /// A change failed and at least one compensation did not succeed.
    PartialFailure,
    /// The change set was never executed.
    Rejected,
    /// A change failed and every applied change was compensated.
    RolledBack,
}

impl Outcome {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Outcome::Success),
            "partial_failure" => Some(Outcome::PartialFailure),
            "rejected" => Some(Outcome::Rejected),
            "rolled_back" => Some(Outcome::RolledBack),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialFailure => write!(f, "partial_failure"),
            Self::Rejected => write!(f, "rejected"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// What happened to one change (or one compensation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub op: ChangeKind,
    pub target: ResourceRef,
    /// Writer calls made, including retries.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChangeRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// One reconcile attempt, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// Monotonic position in the log, in completion order.
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    /// Ties together every attempt made for one intent.
    pub correlation_id: Uuid,
    /// 1 for the first attempt, incremented on every conflict re-diff.
    pub attempt: u32,
    pub intent: Intent,
    pub changeset: ChangeSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalDecision>,
    pub outcome: Outcome,
    pub detail: String,
    /// Forward changes that were applied successfully.
    #[serde(default)]
    pub applied: Vec<ChangeRecord>,
    /// The forward change that stopped execution, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<ChangeRecord>,
    /// Compensations attempted during rollback, in the order they ran.
    #[serde(default)]
    pub rolled_back: Vec<ChangeRecord>,
}

impl AuditRecord {
    /// Start a record for `changeset`. Sequence and timestamp are placeholders
    /// until the record is appended.
    pub fn new(changeset: ChangeSet, outcome: Outcome, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            recorded_at: Utc::now(),
            correlation_id: changeset.intent.id(),
            attempt: 1,
            intent: changeset.intent.clone(),
            changeset,
            approval: None,
            outcome,
            detail: detail.into(),
            applied: Vec::new(),
            failed: None,
            rolled_back: Vec::new(),
        }
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn approval(mut self, approval: ApprovalDecision) -> Self {
        self.approval = Some(approval);
        self
    }

    pub fn applied(mut self, applied: Vec<ChangeRecord>) -> Self {
        self.applied = applied;
        self
    }

    pub fn failed(mut self, failed: Option<ChangeRecord>) -> Self {
        self.failed = failed;
        self
    }

    pub fn rolled_back(mut self, rolled_back: Vec<ChangeRecord>) -> Self {
        self.rolled_back = rolled_back;
        self
    }
}
