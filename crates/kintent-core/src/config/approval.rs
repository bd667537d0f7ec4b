//! Approval policy as data.
//!
//! ```yaml
//! approval:
//!   rules:
//!     - name: deletes-need-confirmation
//!       when: { type: delete }
//!       verdict: requires_confirmation
//!     - name: protect-system
//!       when: { type: namespace, names: [kube-system] }
//!       verdict: denied
//! ```

use serde::{Deserialize, Serialize};

/// Outcome of evaluating a change set, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    AutoApproved,
    RequiresConfirmation,
    Denied,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::AutoApproved => write!(f, "auto_approved"),
            Verdict::RequiresConfirmation => write!(f, "requires_confirmation"),
            Verdict::Denied => write!(f, "denied"),
        }
    }
}

/// A property of a single change that makes it risky.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RiskCondition {
    /// Any delete.
    Delete,
    /// Any change leaving `spec.replicas` at zero.
    ScaleToZero,
    /// Replica reduction of at least `min_percent` of the prior count.
    ScaleDownPercent { min_percent: u32 },
    /// Any container image replacement.
    ImageChange,
    /// Any create.
    Create,
    /// Any change targeting one of these namespaces.
    Namespace { names: Vec<String> },
}

/// A named condition and the verdict it forces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub name: String,
    pub when: RiskCondition,
    pub verdict: Verdict,
}

impl ApprovalRule {
    pub fn new(name: impl Into<String>, when: RiskCondition, verdict: Verdict) -> Self {
        Self {
            name: name.into(),
            when,
            verdict,
        }
    }
}

/// Ordered list of approval rules. An empty list auto-approves everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    #[serde(default = "default_rules")]
    pub rules: Vec<ApprovalRule>,
}

impl ApprovalPolicy {
    pub fn new(rules: Vec<ApprovalRule>) -> Self {
        Self { rules }
    }

    /// A policy with no rules.
    pub fn permissive() -> Self {
        Self { rules: Vec::new() }
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

fn default_rules() -> Vec<ApprovalRule> {
    vec![
        ApprovalRule::new(
            "delete-requires-confirmation",
            RiskCondition::Delete,
            Verdict::RequiresConfirmation,
        ),
        ApprovalRule::new(
            "scale-to-zero-requires-confirmation",
            RiskCondition::ScaleToZero,
            Verdict::RequiresConfirmation,
        ),
        ApprovalRule::new(
            "kube-system-denied",
            RiskCondition::Namespace {
                names: vec!["kube-system".to_string()],
            },
            Verdict::Denied,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_severity_order() {
        assert!(Verdict::Denied > Verdict::RequiresConfirmation);
        assert!(Verdict::RequiresConfirmation > Verdict::AutoApproved);
    }

    #[test]
    fn test_rules_from_yaml() {
        let yaml = r#"
rules:
  - name: big-scale-down
    when: { type: scale_down_percent, min_percent: 50 }
    verdict: requires_confirmation
  - name: no-prod
    when: { type: namespace, names: [prod] }
    verdict: denied
"#;
        let policy: ApprovalPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(
            policy.rules[0].when,
            RiskCondition::ScaleDownPercent { min_percent: 50 }
        );
        assert_eq!(policy.rules[1].verdict, Verdict::Denied);
    }
}
