use anyhow::Result;
use clap::{Parser, Subcommand};
use kintent_audit::AuditLog;
use kintent_core::KintentConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::ClusterHandle;
use commands::apply::ApplyArgs;
use commands::audit::AuditArgs;

#[derive(Parser, Debug)]
#[command(
    name = "kintent",
    version,
    about = "Reconcile Kubernetes Deployments from structured intents"
)]
struct Cli {
    /// Configuration file (YAML). Falls back to ./kintent.yaml, then defaults.
    #[arg(long, global = true, env = "KINTENT_CONFIG")]
    config: Option<PathBuf>,

    /// Run against an empty in-memory cluster instead of kubectl.
    #[arg(long, global = true, default_value_t = false)]
    memory_cluster: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the manifests an intent compiles to, as YAML.
    Compile {
        /// Intent file (.json, .yaml or .yml)
        intent: PathBuf,
    },

    /// Diff an intent against the cluster and show the approval decision.
    Plan {
        intent: PathBuf,

        /// Print the change set and decision as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Reconcile the cluster towards an intent.
    Apply {
        intent: PathBuf,

        /// Confirm change sets that require confirmation
        #[arg(long, short = 'y', default_value_t = false)]
        yes: bool,

        /// Give up (and roll back) after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Query the audit log.
    Audit {
        /// Deployment name
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        namespace: Option<String>,

        /// success, partial_failure, rejected or rolled_back
        #[arg(long)]
        outcome: Option<String>,

        /// Only records at or after this RFC 3339 time
        #[arg(long)]
        since: Option<String>,

        /// Only records at or before this RFC 3339 time
        #[arg(long)]
        until: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// One JSON record per line
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = KintentConfig::load(cli.config.as_deref())?;

    match cli.cmd {
        Command::Compile { intent } => commands::compile::run(&intent)?,

        Command::Plan { intent, json } => {
            let cluster = ClusterHandle::connect(&config.cluster, cli.memory_cluster);
            commands::plan::run(&config, &cluster, &intent, json).await?
        }

        Command::Apply {
            intent,
            yes,
            timeout,
        } => {
            let cluster = ClusterHandle::connect(&config.cluster, cli.memory_cluster);
            let audit = Arc::new(AuditLog::open(&config.audit)?);
            let args = ApplyArgs { yes, timeout };
            let code = commands::apply::run(
                &config,
                &cluster,
                audit,
                &intent,
                &args,
                Some(cancel_on_interrupt()),
            )
            .await?;
            return Ok(ExitCode::from(code));
        }

        Command::Audit {
            name,
            namespace,
            outcome,
            since,
            until,
            limit,
            json,
        } => {
            let args = AuditArgs {
                name,
                namespace,
                outcome,
                since,
                until,
                limit,
                json,
            };
            commands::audit::run(&config.audit, &args).await?
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Flip the returned receiver to `true` on Ctrl-C.
fn cancel_on_interrupt() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping before the next write");
            let _ = tx.send(true);
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::try_parse_from([
            "kintent",
            "apply",
            "web.yaml",
            "--yes",
            "--timeout",
            "60",
            "--memory-cluster",
        ])
        .unwrap();
        assert!(cli.memory_cluster);
        match cli.cmd {
            Command::Apply {
                intent,
                yes,
                timeout,
            } => {
                assert_eq!(intent, PathBuf::from("web.yaml"));
                assert!(yes);
                assert_eq!(timeout, Some(60));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
