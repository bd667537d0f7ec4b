//! CLI command implementations for kintent.

pub mod apply;
pub mod audit;
pub mod compile;
pub mod input;
pub mod plan;

use kintent_adapter_kubectl::KubectlCluster;
use kintent_core::{ClusterConfig, ClusterReader, ClusterWriter};
use kintent_runtime::MemoryCluster;
use std::sync::Arc;

/// Reader and writer for the cluster a command runs against.
#[derive(Clone)]
pub struct ClusterHandle {
    pub reader: Arc<dyn ClusterReader>,
    pub writer: Arc<dyn ClusterWriter>,
}

impl ClusterHandle {
    /// The real cluster through kubectl, or a fresh in-memory one.
    pub fn connect(config: &ClusterConfig, memory: bool) -> Self {
        if memory {
            return Self::memory(Arc::new(MemoryCluster::new()));
        }
        let cluster = Arc::new(KubectlCluster::new(config.clone()));
        Self {
            reader: cluster.clone(),
            writer: cluster,
        }
    }

    pub fn memory(cluster: Arc<MemoryCluster>) -> Self {
        Self {
            reader: cluster.clone(),
            writer: cluster,
        }
    }
}
