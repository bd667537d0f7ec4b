//! `kintent audit`: query the audit log.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use kintent_audit::{AuditFilter, AuditLog, AuditRecord, FileStorage, Outcome};
use kintent_core::AuditConfig;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct AuditArgs {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub outcome: Option<String>,
    /// RFC 3339 timestamp.
    pub since: Option<String>,
    /// RFC 3339 timestamp.
    pub until: Option<String>,
    pub limit: Option<usize>,
    /// One JSON record per line instead of a table.
    pub json: bool,
}

fn parse_time(flag: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("--{} expects an RFC 3339 timestamp, got '{}'", flag, value))
}

pub fn filter(args: &AuditArgs) -> Result<AuditFilter> {
    let outcome = args
        .outcome
        .as_deref()
        .map(|o| {
            Outcome::parse(o).ok_or_else(|| {
                anyhow!(
                    "unknown outcome '{}': expected success, partial_failure, rejected or rolled_back",
                    o
                )
            })
        })
        .transpose()?;

    Ok(AuditFilter {
        since: args.since.as_deref().map(|v| parse_time("since", v)).transpose()?,
        until: args.until.as_deref().map(|v| parse_time("until", v)).transpose()?,
        name: args.name.clone(),
        namespace: args.namespace.clone(),
        outcome,
        correlation_id: None,
        limit: args.limit,
        offset: None,
    })
}

pub async fn run(config: &AuditConfig, args: &AuditArgs) -> Result<()> {
    let filter = filter(args)?;
    let storage = FileStorage::open(&config.path, config.sync)
        .with_context(|| format!("Failed to open audit log {}", config.path.display()))?;
    let log = AuditLog::with_storage(Arc::new(storage));
    let records = log.query(&filter).await?;

    if args.json {
        for record in &records {
            println!("{}", serde_json::to_string(record)?);
        }
    } else {
        print!("{}", render(&records));
    }
    Ok(())
}

pub fn render(records: &[AuditRecord]) -> String {
    if records.is_empty() {
        return "No audit records found.\n".to_string();
    }
    let mut out = format!(
        "{:>5}  {:<20}  {:<30}  {:>3}  {:<15}  {}\n",
        "SEQ", "RECORDED", "TARGET", "TRY", "OUTCOME", "DETAIL"
    );
    for record in records {
        let target = format!("{}/{}", record.intent.namespace(), record.intent.name());
        out.push_str(&format!(
            "{:>5}  {:<20}  {:<30}  {:>3}  {:<15}  {}\n",
            record.sequence,
            record.recorded_at.format("%Y-%m-%dT%H:%M:%SZ"),
            target,
            record.attempt,
            record.outcome.to_string(),
            record.detail
        ));
    }
    out
}
