//! `kintent apply`: reconcile the cluster towards an intent.

use anyhow::Result;
use kintent_audit::{AuditLog, Outcome};
use kintent_core::KintentConfig;
use kintent_runtime::{ReconcileError, ReconcileOptions, ReconcileReport, Reconciler};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::ClusterHandle;
use super::input::load_intent;

/// Exit code when the change set is waiting for `--yes`.
pub const EXIT_NEEDS_CONFIRMATION: u8 = 2;

#[derive(Debug, Clone, Default)]
pub struct ApplyArgs {
    /// Confirm change sets that require it.
    pub yes: bool,
    /// Overall deadline in seconds.
    pub timeout: Option<u64>,
}

pub async fn run(
    config: &KintentConfig,
    cluster: &ClusterHandle,
    audit: Arc<AuditLog>,
    intent_path: &Path,
    args: &ApplyArgs,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<u8> {
    let intent = load_intent(intent_path)?;
    let reconciler = Reconciler::from_config(
        config,
        cluster.reader.clone(),
        cluster.writer.clone(),
        audit,
    );

    let options = ReconcileOptions {
        confirmed: args.yes,
        timeout: args.timeout.map(Duration::from_secs),
        cancel,
    };

    let report = match reconciler.reconcile(&intent, options).await {
        Ok(report) => report,
        Err(ReconcileError::Execute(err)) => {
            let outcome = err.outcome();
            eprintln!(
                "Cluster changes finished ({}: {}) but the audit record was not written",
                outcome.outcome, outcome.detail
            );
            return Err(err.into());
        }
        Err(err) => {
            if let ReconcileError::ClusterRead {
                report,
                audit_sequence,
                ..
            } = &err
            {
                print!("{}", render(report));
                eprintln!("Cluster state could not be read (audit #{})", audit_sequence);
            }
            return Err(err.into());
        }
    };

    print!("{}", render(&report));
    Ok(exit_code(&report, args.yes))
}

pub fn render(report: &ReconcileReport) -> String {
    let mut out = String::new();
    for attempt in &report.attempts {
        out.push_str(&format!(
            "attempt {}: {}: {}\n",
            attempt.attempt, attempt.outcome.outcome, attempt.outcome.detail
        ));
        for record in &attempt.outcome.applied {
            out.push_str(&format!("  applied {} {}\n", record.op, record.target));
        }
        if let Some(failed) = &attempt.outcome.failed {
            out.push_str(&format!(
                "  failed {} {}: {}\n",
                failed.op,
                failed.target,
                failed.error.as_deref().unwrap_or_default()
            ));
        }
        for record in &attempt.outcome.rolled_back {
            match &record.error {
                None => out.push_str(&format!("  rolled back {} {}\n", record.op, record.target)),
                Some(err) => out.push_str(&format!(
                    "  rollback failed {} {}: {}\n",
                    record.op, record.target, err
                )),
            }
        }
        if let Some(sequence) = attempt.outcome.audit_sequence {
            out.push_str(&format!("  audit #{}\n", sequence));
        }
    }
    out
}

/// 0 on success, 2 when confirmation is needed, 1 otherwise.
pub fn exit_code(report: &ReconcileReport, confirmed: bool) -> u8 {
    let Some(last) = report.last() else {
        return 1;
    };
    match last.outcome.outcome {
        Outcome::Success => 0,
        Outcome::Rejected if !confirmed && last.decision.requires_confirmation() => {
            eprintln!("Change set requires confirmation; re-run with --yes to apply it");
            EXIT_NEEDS_CONFIRMATION
        }
        _ => 1,
    }
}
