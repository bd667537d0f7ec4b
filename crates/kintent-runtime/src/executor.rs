//! Applies approved change sets with retry and compensating rollback.
//!
//! The executor is the only component that mutates the cluster. It:
//!
//! 1. refuses change sets that are in conflict, denied, unconfirmed, or paired
//!    with a decision made for a different change set;
//! 2. applies changes in dependency order, retrying retryable errors;
//! 3. on the first unrecoverable failure, compensates every applied change
//!    in reverse order;
//! 4. appends exactly one audit record before returning.

use crate::retry::{RetryPolicy, StopReason, StopSignal, retry_classified};
use kintent_audit::{AuditError, AuditLog, AuditRecord, ChangeRecord, Outcome};
use kintent_core::{Change, ChangeSet, ChangeSetState, ClassifiedError, ClusterWriter, Verdict};
use kintent_policy::ApprovalDecision;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Per-execution options.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Explicit operator confirmation for `RequiresConfirmation` verdicts.
    pub confirmed: bool,
    /// No new change is started after this instant.
    pub deadline: Option<Instant>,
    /// Setting the value to `true` stops forward progress.
    pub cancel: Option<watch::Receiver<bool>>,
    /// Attempt number recorded in the audit log.
    pub attempt: u32,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            confirmed: false,
            deadline: None,
            cancel: None,
            attempt: 1,
        }
    }
}

impl ExecuteOptions {
    pub fn confirmed() -> Self {
        Self {
            confirmed: true,
            ..Self::default()
        }
    }
}

/// What one execution did.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub outcome: Outcome,
    pub detail: String,
    pub applied: Vec<ChangeRecord>,
    pub failed: Option<ChangeRecord>,
    pub rolled_back: Vec<ChangeRecord>,
    /// A writer reported a stale precondition; a fresh diff may succeed.
    pub conflict: bool,
    /// Sequence of the audit record written for this execution.
    pub audit_sequence: Option<u64>,
}

impl ReconcileOutcome {
    fn rejected(detail: String) -> Self {
        Self {
            outcome: Outcome::Rejected,
            detail,
            applied: Vec::new(),
            failed: None,
            rolled_back: Vec::new(),
            conflict: false,
            audit_sequence: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The cluster may have been mutated but the audit record was not
    /// persisted.
    #[error("audit write failed after {} execution: {source}", .outcome.outcome)]
    AuditWrite {
        outcome: Box<ReconcileOutcome>,
        #[source]
        source: AuditError,
    },
}

impl ExecuteError {
    /// The execution result the error carries.
    pub fn outcome(&self) -> &ReconcileOutcome {
        match self {
            ExecuteError::AuditWrite { outcome, .. } => outcome,
        }
    }
}

enum Failure {
    Cluster(ClassifiedError),
    Stopped(StopReason, Option<ClassifiedError>),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Cluster(err) => write!(f, "{}", err),
            Failure::Stopped(reason, None) => write!(f, "{}", reason),
            Failure::Stopped(reason, Some(err)) => write!(f, "{} while retrying: {}", reason, err),
        }
    }
}

/// Applies change sets through a [`ClusterWriter`].
pub struct ReconcileExecutor {
    writer: Arc<dyn ClusterWriter>,
    audit: Arc<AuditLog>,
    retry: RetryPolicy,
}

impl ReconcileExecutor {
    pub fn new(writer: Arc<dyn ClusterWriter>, audit: Arc<AuditLog>, retry: RetryPolicy) -> Self {
        Self {
            writer,
            audit,
            retry,
        }
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Why `change_set` must not run, if anything.
    fn rejection(
        change_set: &ChangeSet,
        approval: &ApprovalDecision,
        options: &ExecuteOptions,
    ) -> Option<String> {
        if approval.changeset_id != change_set.id {
            return Some(format!(
                "approval decision belongs to change set {}, not {}",
                approval.changeset_id, change_set.id
            ));
        }
        if let ChangeSetState::Conflict { resource, reason } = &change_set.state {
            return Some(format!("conflict on {}: {}", resource, reason));
        }
        match approval.verdict {
            Verdict::Denied => Some(format!("denied: {}", approval.reason)),
            Verdict::RequiresConfirmation if !options.confirmed => {
                Some(format!("confirmation required: {}", approval.reason))
            }
            _ => None,
        }
    }

    /// Execute `change_set` under `approval`.
    pub async fn execute(
        &self,
        change_set: &ChangeSet,
        approval: &ApprovalDecision,
        options: ExecuteOptions,
    ) -> Result<ReconcileOutcome, ExecuteError> {
        let attempt = options.attempt;
        let outcome = match Self::rejection(change_set, approval, &options) {
            Some(reason) => {
                warn!(changeset_id = %change_set.id, reason = %reason, "Change set rejected");
                ReconcileOutcome::rejected(reason)
            }
            None => {
                let stop = StopSignal::new(options.deadline, options.cancel);
                self.run(change_set, &stop).await
            }
        };
        self.record(change_set, approval, attempt, outcome).await
    }

    async fn run(&self, change_set: &ChangeSet, stop: &StopSignal) -> ReconcileOutcome {
        let mut applied: Vec<(&Change, ChangeRecord)> = Vec::new();
        let mut failed: Option<ChangeRecord> = None;
        let mut failure: Option<Failure> = None;

        for change in change_set.ordered() {
            if let Some(reason) = stop.check() {
                failure = Some(Failure::Stopped(reason, None));
                break;
            }

            let description = change.describe();
            let result =
                retry_classified(&self.retry, &description, stop, || self.writer.apply(change))
                    .await;
            let mut record = ChangeRecord {
                op: change.kind(),
                target: change.target().clone(),
                attempts: result.attempts,
                error: None,
            };

            match result.result {
                Ok(()) => {
                    info!(
                        changeset_id = %change_set.id,
                        change = %description,
                        attempts = result.attempts,
                        "Change applied"
                    );
                    applied.push((change, record));
                }
                Err(err) => {
                    let reason = match result.stopped {
                        Some(reason) => Failure::Stopped(reason, Some(err)),
                        None => Failure::Cluster(err),
                    };
                    warn!(
                        changeset_id = %change_set.id,
                        change = %description,
                        attempts = result.attempts,
                        error = %reason,
                        "Change failed"
                    );
                    record.error = Some(reason.to_string());
                    failed = Some(record);
                    failure = Some(reason);
                    break;
                }
            }
        }

        let Some(failure) = failure else {
            let detail = if applied.is_empty() {
                "no changes".to_string()
            } else {
                format!("applied {} change(s)", applied.len())
            };
            info!(changeset_id = %change_set.id, detail = %detail, "Change set applied");
            return ReconcileOutcome {
                outcome: Outcome::Success,
                detail,
                applied: applied.into_iter().map(|(_, r)| r).collect(),
                failed: None,
                rolled_back: Vec::new(),
                conflict: false,
                audit_sequence: None,
            };
        };

        let rolled_back = self.rollback(change_set, &applied).await;
        let complete = rolled_back.iter().all(ChangeRecord::succeeded);
        let outcome = if complete {
            Outcome::RolledBack
        } else {
            Outcome::PartialFailure
        };
        let conflict = matches!(&failure, Failure::Cluster(e) if e.is_conflict());
        let detail = match (&failed, complete) {
            (Some(f), true) => format!("{} {} failed: {}; rolled back", f.op, f.target, failure),
            (Some(f), false) => format!(
                "{} {} failed: {}; rollback incomplete",
                f.op, f.target, failure
            ),
            (None, true) => format!("stopped: {}; rolled back", failure),
            (None, false) => format!("stopped: {}; rollback incomplete", failure),
        };

        ReconcileOutcome {
            outcome,
            detail,
            applied: applied.into_iter().map(|(_, r)| r).collect(),
            failed,
            rolled_back,
            conflict,
            audit_sequence: None,
        }
    }

    /// Compensate `applied` in reverse order. Never interrupted.
    async fn rollback(
        &self,
        change_set: &ChangeSet,
        applied: &[(&Change, ChangeRecord)],
    ) -> Vec<ChangeRecord> {
        let never = StopSignal::never();
        let mut records = Vec::with_capacity(applied.len());

        for (change, _) in applied.iter().rev() {
            let Some(compensation) = change.compensation() else {
                error!(
                    changeset_id = %change_set.id,
                    change = %change.describe(),
                    "No prior state captured; cannot compensate"
                );
                records.push(ChangeRecord {
                    op: change.kind(),
                    target: change.target().clone(),
                    attempts: 0,
                    error: Some("no prior state captured".to_string()),
                });
                continue;
            };

            let description = format!("rollback {}", compensation.describe());
            let result = retry_classified(&self.retry, &description, &never, || {
                self.writer.apply(&compensation)
            })
            .await;
            let error = result.result.err().map(|e| e.to_string());
            match &error {
                None => info!(changeset_id = %change_set.id, change = %description, "Compensated"),
                Some(err) => error!(
                    changeset_id = %change_set.id,
                    change = %description,
                    error = %err,
                    "Compensation failed"
                ),
            }
            records.push(ChangeRecord {
                op: compensation.kind(),
                target: compensation.target().clone(),
                attempts: result.attempts,
                error,
            });
        }
        records
    }

    async fn record(
        &self,
        change_set: &ChangeSet,
        approval: &ApprovalDecision,
        attempt: u32,
        mut outcome: ReconcileOutcome,
    ) -> Result<ReconcileOutcome, ExecuteError> {
        let record = AuditRecord::new(change_set.clone(), outcome.outcome, outcome.detail.clone())
            .attempt(attempt)
            .approval(approval.clone())
            .applied(outcome.applied.clone())
            .failed(outcome.failed.clone())
            .rolled_back(outcome.rolled_back.clone());

        match self.audit.append(record).await {
            Ok(appended) => {
                outcome.audit_sequence = Some(appended.sequence);
                Ok(outcome)
            }
            Err(source) => {
                error!(
                    changeset_id = %change_set.id,
                    outcome = %outcome.outcome,
                    error = %source,
                    "Failed to persist audit record"
                );
                Err(ExecuteError::AuditWrite {
                    outcome: Box::new(outcome),
                    source,
                })
            }
        }
    }
}
