//! Cluster access configuration.

use serde::{Deserialize, Serialize};

/// How the kubectl adapter reaches the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// kubectl binary to invoke.
    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    /// kubeconfig context; the current context when unset.
    #[serde(default)]
    pub context: Option<String>,

    /// kubeconfig path; kubectl's default lookup when unset.
    #[serde(default)]
    pub kubeconfig: Option<String>,

    /// Per-call request timeout passed to kubectl.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            context: None,
            kubeconfig: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}
