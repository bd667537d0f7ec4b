//! `kintent plan`: show the change set and approval decision for an intent
//! without touching the cluster.

use anyhow::Result;
use kintent_core::{Change, ChangeSet, KintentConfig};
use kintent_diff::DiffEngine;
use kintent_policy::{ApprovalDecision, ApprovalGate};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

use super::ClusterHandle;
use super::input::load_intent;

#[derive(Serialize)]
struct PlanOutput<'a> {
    changeset: &'a ChangeSet,
    decision: &'a ApprovalDecision,
}

pub async fn run(
    config: &KintentConfig,
    cluster: &ClusterHandle,
    intent_path: &Path,
    json: bool,
) -> Result<()> {
    let intent = load_intent(intent_path)?;
    let manifests = kintent_compiler::compile(&intent)?;
    let changeset = DiffEngine::new(cluster.reader.clone())
        .plan(&manifests)
        .await?;
    let decision = ApprovalGate::new(config.approval.clone()).evaluate(&changeset);

    if json {
        let output = PlanOutput {
            changeset: &changeset,
            decision: &decision,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print!("{}", render(&changeset, &decision));
    }
    Ok(())
}

fn value(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "<unset>".to_string(),
    }
}

/// Human-readable plan.
pub fn render(changeset: &ChangeSet, decision: &ApprovalDecision) -> String {
    let mut out = format!(
        "Intent:     {} ({})\nChange set: {}\n",
        changeset.intent.summary(),
        changeset.intent.id(),
        changeset.id
    );

    if changeset.is_conflict() || changeset.changes.is_empty() {
        out.push_str(&format!("  {}\n", changeset.summary()));
    }
    for change in changeset.ordered() {
        out.push_str(&format!("  {} {}\n", change.kind(), change.target()));
        if let Change::Update { fields, .. } = change {
            for field in fields {
                out.push_str(&format!(
                    "      {}: {} -> {}\n",
                    field.path,
                    value(field.old.as_ref()),
                    value(Some(&field.new))
                ));
            }
        }
    }

    out.push_str(&format!("Verdict:    {}", decision.verdict));
    if !decision.matched_rules.is_empty() {
        out.push_str(&format!(" ({})", decision.matched_rules.join(", ")));
    }
    out.push_str(&format!("\nReason:     {}\n", decision.reason));
    out
}
