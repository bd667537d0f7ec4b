//! # kintent-policy
//!
//! The approval gate. Every change set is classified before it reaches the
//! executor: auto-approved, waiting for explicit confirmation, or denied.
//!
//! Rules are data ([`ApprovalPolicy`], loaded from configuration). Each rule
//! matched by any change in the set contributes its verdict, and the most
//! severe verdict wins.

use chrono::{DateTime, Utc};
use kintent_core::{
    ApprovalPolicy, ApprovalRule, Change, ChangeKind, ChangeSet, ChangeSetState, RiskCondition,
    Verdict,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The gate's answer for one change set.
///
/// A decision is bound to the change set it was computed for; the executor
/// refuses to use it for any other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub changeset_id: Uuid,
    pub verdict: Verdict,
    pub reason: String,
    /// Names of the rules that matched, in policy order.
    #[serde(default)]
    pub matched_rules: Vec<String>,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalDecision {
    pub fn is_denied(&self) -> bool {
        self.verdict == Verdict::Denied
    }

    pub fn requires_confirmation(&self) -> bool {
        self.verdict == Verdict::RequiresConfirmation
    }
}

/// Evaluates change sets against an [`ApprovalPolicy`].
#[derive(Debug, Clone, Default)]
pub struct ApprovalGate {
    policy: ApprovalPolicy,
}

impl ApprovalGate {
    pub fn new(policy: ApprovalPolicy) -> Self {
        Self { policy }
    }

    /// Classify a change set. Pure apart from the decision timestamp.
    pub fn evaluate(&self, change_set: &ChangeSet) -> ApprovalDecision {
        let decision = match &change_set.state {
            ChangeSetState::Conflict { resource, reason } => ApprovalDecision {
                changeset_id: change_set.id,
                verdict: Verdict::Denied,
                reason: format!("change set is in conflict on {}: {}", resource, reason),
                matched_rules: Vec::new(),
                decided_at: Utc::now(),
            },
            ChangeSetState::Ready => self.evaluate_changes(change_set),
        };

        tracing::info!(
            changeset_id = %change_set.id,
            verdict = %decision.verdict,
            matched_rules = ?decision.matched_rules,
            "Evaluated change set"
        );
        decision
    }

    fn evaluate_changes(&self, change_set: &ChangeSet) -> ApprovalDecision {
        let mut verdict = Verdict::AutoApproved;
        let mut matched_rules = Vec::new();
        let mut reasons = Vec::new();

        for rule in &self.policy.rules {
            let hits: Vec<&Change> = change_set
                .changes
                .iter()
                .filter(|change| matches_rule(rule, change))
                .collect();
            if hits.is_empty() {
                continue;
            }
            verdict = verdict.max(rule.verdict);
            matched_rules.push(rule.name.clone());
            for change in hits {
                reasons.push(format!("{} ({})", rule.name, change.describe()));
            }
        }

        let reason = if change_set.changes.is_empty() {
            "no changes".to_string()
        } else if reasons.is_empty() {
            "no approval rule matched".to_string()
        } else {
            reasons.join("; ")
        };

        ApprovalDecision {
            changeset_id: change_set.id,
            verdict,
            reason,
            matched_rules,
            decided_at: Utc::now(),
        }
    }
}

/// Whether a single change triggers a rule.
pub fn matches_rule(rule: &ApprovalRule, change: &Change) -> bool {
    match &rule.when {
        RiskCondition::Delete => change.kind() == ChangeKind::Delete,
        RiskCondition::Create => change.kind() == ChangeKind::Create,
        RiskCondition::ImageChange => change.changes_image(),
        RiskCondition::ScaleToZero => {
            change.kind() != ChangeKind::Delete
                && matches!(change.replica_transition(), Some((_, 0)))
        }
        RiskCondition::ScaleDownPercent { min_percent } => {
            if change.kind() == ChangeKind::Delete {
                return false;
            }
            match change.replica_transition() {
                Some((Some(before), after)) if before > 0 && after < before => {
                    (before - after) * 100 >= before * i64::from(*min_percent)
                }
                _ => false,
            }
        }
        RiskCondition::Namespace { names } => {
            names.iter().any(|name| name == &change.target().namespace)
        }
    }
}
