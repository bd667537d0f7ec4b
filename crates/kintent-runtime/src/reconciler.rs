//! The end-to-end pipeline: compile, plan, evaluate, execute.
//!
//! A change set that comes back in conflict, or an execution stopped by a
//! stale precondition, is re-planned against a fresh snapshot up to
//! `max_conflict_refreshes` times. Every attempt that reaches the executor is
//! audited with its own attempt number. Snapshot reads are retried like
//! writes, and a read that still fails is audited before it is returned.

use crate::executor::{ExecuteError, ExecuteOptions, ReconcileExecutor, ReconcileOutcome};
use crate::retry::{Attempted, RetryPolicy, StopSignal, retry_classified};
use chrono::Utc;
use kintent_audit::{AuditError, AuditLog, AuditRecord, Outcome};
use kintent_compiler::{CompileError, ManifestCompiler};
use kintent_core::{
    ChangeSet, ClassifiedError, ClusterReader, ClusterSnapshot, ClusterWriter, Intent,
    KintentConfig, ManifestSet, ReconcileConfig,
};
use kintent_diff::{DiffEngine, DiffError, diff};
use kintent_policy::{ApprovalDecision, ApprovalGate};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),

    /// Reading cluster state failed after retries. The failure is audited
    /// and `report` holds the attempts that ran before it.
    #[error("failed to read cluster state after {attempts} attempt(s): {detail}")]
    ClusterRead {
        detail: String,
        #[source]
        source: ClassifiedError,
        attempts: u32,
        audit_sequence: u64,
        report: Box<ReconcileReport>,
    },

    #[error("failed to read cluster state ({read}) and the audit record was not written: {source}")]
    ClusterReadAudit {
        read: ClassifiedError,
        #[source]
        source: AuditError,
    },
}

/// Caller options for one reconcile.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Operator confirmed the change up front.
    pub confirmed: bool,
    /// Overrides the configured timeout.
    pub timeout: Option<Duration>,
    pub cancel: Option<watch::Receiver<bool>>,
}

/// One planned-and-executed attempt.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub attempt: u32,
    pub changeset: ChangeSet,
    pub decision: ApprovalDecision,
    pub outcome: ReconcileOutcome,
}

/// Everything a reconcile did.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub intent_id: Uuid,
    pub attempts: Vec<AttemptReport>,
}

impl ReconcileReport {
    /// The attempt that decided the result.
    pub fn last(&self) -> Option<&AttemptReport> {
        self.attempts.last()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.last().map(|a| a.outcome.outcome)
    }
}

/// Result of a dry run: what would be done and whether it would be allowed.
#[derive(Debug, Clone)]
pub struct Preview {
    pub manifests: ManifestSet,
    pub changeset: ChangeSet,
    pub decision: ApprovalDecision,
}

/// Drives an intent through the whole pipeline.
pub struct Reconciler {
    compiler: ManifestCompiler,
    diff: DiffEngine,
    gate: ApprovalGate,
    executor: ReconcileExecutor,
    retry: RetryPolicy,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(
        diff: DiffEngine,
        gate: ApprovalGate,
        executor: ReconcileExecutor,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            compiler: ManifestCompiler::default(),
            diff,
            gate,
            executor,
            retry: RetryPolicy::from(&config),
            config,
        }
    }

    /// Wire every component from configuration.
    pub fn from_config(
        config: &KintentConfig,
        reader: Arc<dyn ClusterReader>,
        writer: Arc<dyn ClusterWriter>,
        audit: Arc<AuditLog>,
    ) -> Self {
        let executor =
            ReconcileExecutor::new(writer, audit, RetryPolicy::from(&config.reconcile));
        Self::new(
            DiffEngine::new(reader),
            ApprovalGate::new(config.approval.clone()),
            executor,
            config.reconcile.clone(),
        )
    }

    pub fn with_compiler(mut self, compiler: ManifestCompiler) -> Self {
        self.compiler = compiler;
        self
    }

    /// Compile, plan and evaluate without touching the cluster.
    pub async fn preview(&self, intent: &Intent) -> Result<Preview, ReconcileError> {
        let manifests = self.compiler.compile(intent)?;
        let snapshot = self
            .read_state(&manifests, &StopSignal::never())
            .await
            .result
            .map_err(DiffError::Cluster)?;
        let changeset = diff(&manifests, &snapshot)?;
        let decision = self.gate.evaluate(&changeset);
        Ok(Preview {
            manifests,
            changeset,
            decision,
        })
    }

    /// Reconcile the cluster towards `intent`.
    pub async fn reconcile(
        &self,
        intent: &Intent,
        options: ReconcileOptions,
    ) -> Result<ReconcileReport, ReconcileError> {
        let manifests = self.compiler.compile(intent)?;
        let deadline = options
            .timeout
            .or(self.config.timeout())
            .map(|t| Instant::now() + t);
        let stop = StopSignal::new(deadline, options.cancel.clone());
        let max_attempts = self.config.max_conflict_refreshes.saturating_add(1);

        let mut report = ReconcileReport {
            intent_id: intent.id(),
            attempts: Vec::new(),
        };

        for attempt in 1..=max_attempts {
            let read = self.read_state(&manifests, &stop).await;
            let snapshot = match read.result {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    let detail = match read.stopped {
                        Some(reason) => format!("{} while retrying: {}", reason, err),
                        None => err.to_string(),
                    };
                    return Err(self
                        .record_read_failure(intent, attempt, read.attempts, detail, err, report)
                        .await);
                }
            };
            let changeset = diff(&manifests, &snapshot)?;
            info!(
                intent_id = %intent.id(),
                changeset_id = %changeset.id,
                changes = changeset.changes.len(),
                conflict = changeset.is_conflict(),
                "Planned change set"
            );
            let decision = self.gate.evaluate(&changeset);
            let outcome = self
                .executor
                .execute(
                    &changeset,
                    &decision,
                    ExecuteOptions {
                        confirmed: options.confirmed,
                        deadline,
                        cancel: options.cancel.clone(),
                        attempt,
                    },
                )
                .await?;

            let retry = changeset.is_conflict() || outcome.conflict;
            info!(
                intent_id = %intent.id(),
                attempt = attempt,
                outcome = %outcome.outcome,
                detail = %outcome.detail,
                "Reconcile attempt finished"
            );
            report.attempts.push(AttemptReport {
                attempt,
                changeset,
                decision,
                outcome,
            });

            if !retry {
                break;
            }
            if attempt == max_attempts {
                warn!(
                    intent_id = %intent.id(),
                    attempts = attempt,
                    "Conflict persisted after all refreshes"
                );
                break;
            }

            let delay = self.config.conflict_refresh_delay();
            warn!(
                intent_id = %intent.id(),
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Conflict detected, refreshing cluster state"
            );
            if let Err(reason) = stop.sleep(delay).await {
                warn!(intent_id = %intent.id(), reason = %reason, "Reconcile stopped");
                break;
            }
        }

        Ok(report)
    }

    async fn read_state(
        &self,
        manifests: &ManifestSet,
        stop: &StopSignal,
    ) -> Attempted<ClusterSnapshot> {
        retry_classified(&self.retry, "read cluster state", stop, || {
            self.diff.snapshot(manifests)
        })
        .await
    }

    /// Audit a snapshot read that failed for good and build the error.
    async fn record_read_failure(
        &self,
        intent: &Intent,
        attempt: u32,
        reads: u32,
        detail: String,
        err: ClassifiedError,
        report: ReconcileReport,
    ) -> ReconcileError {
        let changeset = ChangeSet::new(intent.clone(), Utc::now(), Vec::new());
        let record = AuditRecord::new(
            changeset,
            Outcome::Rejected,
            format!("failed to read cluster state after {} attempt(s): {}", reads, detail),
        )
        .attempt(attempt);

        match self.executor.audit().append(record).await {
            Ok(appended) => {
                warn!(
                    intent_id = %intent.id(),
                    attempt = attempt,
                    reads = reads,
                    error = %detail,
                    "Cluster state could not be read"
                );
                ReconcileError::ClusterRead {
                    detail,
                    source: err,
                    attempts: reads,
                    audit_sequence: appended.sequence,
                    report: Box::new(report),
                }
            }
            Err(source) => {
                error!(intent_id = %intent.id(), error = %source, "Failed to persist audit record");
                ReconcileError::ClusterReadAudit { read: err, source }
            }
        }
    }
}
