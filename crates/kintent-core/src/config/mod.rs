//! Configuration types shared across kintent crates.
//!
//! Configuration is loaded from a single YAML file (`kintent.yaml` by
//! default). Every section and field has a default, so an empty file or no
//! file at all yields a working configuration.
//!
//! # Sections
//!
//! - **reconcile**: retry, backoff, conflict refresh and timeout settings
//! - **audit**: audit log location and durability
//! - **cluster**: how the kubectl adapter reaches the cluster
//! - **approval**: risk rules evaluated before every execution

pub mod approval;
pub mod audit;
pub mod cluster;
pub mod reconcile;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use approval::{ApprovalPolicy, ApprovalRule, RiskCondition, Verdict};
pub use audit::AuditConfig;
pub use cluster::ClusterConfig;
pub use reconcile::ReconcileConfig;

/// File looked up in the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "kintent.yaml";

/// Complete kintent configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KintentConfig {
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub approval: ApprovalPolicy,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KintentConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration file: an explicit path, then
    /// [`DEFAULT_CONFIG_FILE`] when it exists, then built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let fallback = Path::new(DEFAULT_CONFIG_FILE);
        if fallback.exists() {
            return Self::from_file(fallback);
        }
        Ok(Self::default())
    }

    /// Reject values that would make the executor misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.reconcile;
        if !(r.backoff_multiplier.is_finite() && r.backoff_multiplier >= 1.0) {
            return Err(ConfigError::Config(format!(
                "reconcile.backoff_multiplier must be >= 1.0, got {}",
                r.backoff_multiplier
            )));
        }
        if r.max_backoff_ms < r.initial_backoff_ms {
            return Err(ConfigError::Config(format!(
                "reconcile.max_backoff_ms ({}) is below initial_backoff_ms ({})",
                r.max_backoff_ms, r.initial_backoff_ms
            )));
        }
        if r.timeout_secs == Some(0) {
            return Err(ConfigError::Config(
                "reconcile.timeout_secs must be positive".to_string(),
            ));
        }
        for rule in &self.approval.rules {
            if let RiskCondition::ScaleDownPercent { min_percent } = rule.when {
                if min_percent == 0 || min_percent > 100 {
                    return Err(ConfigError::Config(format!(
                        "approval rule '{}': min_percent must be in 1..=100",
                        rule.name
                    )));
                }
            }
        }
        Ok(())
    }
}
