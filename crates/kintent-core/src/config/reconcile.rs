//! Executor retry and conflict-refresh settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for applying change sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Retries per change after the first attempt, for retryable errors only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the delay between retries.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Multiplier applied to the delay after each retry.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// How many times a conflicting change set is re-fetched and re-diffed.
    #[serde(default = "default_max_conflict_refreshes")]
    pub max_conflict_refreshes: u32,

    /// Pause before re-fetching after a conflict.
    #[serde(default = "default_conflict_refresh_delay_ms")]
    pub conflict_refresh_delay_ms: u64,

    /// Overall deadline for one execution, after which forward progress stops
    /// and applied changes are rolled back.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ReconcileConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn conflict_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.conflict_refresh_delay_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_conflict_refreshes: default_max_conflict_refreshes(),
            conflict_refresh_delay_ms: default_conflict_refresh_delay_ms(),
            timeout_secs: None,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_conflict_refreshes() -> u32 {
    3
}

fn default_conflict_refresh_delay_ms() -> u64 {
    1000
}
