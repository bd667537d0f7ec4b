//! Audit log configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where and how audit records are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// JSON Lines file holding the audit trail.
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Whether each append is synced to disk before the executor returns.
    #[serde(default = "default_sync")]
    pub sync: bool,

    /// Whether records are also echoed to stdout as log lines.
    #[serde(default)]
    pub stdout: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            sync: default_sync(),
            stdout: false,
        }
    }
}

fn default_path() -> PathBuf {
    PathBuf::from("kintent-audit.jsonl")
}

fn default_sync() -> bool {
    true
}
