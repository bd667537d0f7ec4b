//! Cluster access through the `kubectl` binary.
//!
//! [`KubectlCluster`] implements [`ClusterReader`] and [`ClusterWriter`] by
//! invoking `kubectl` with JSON in and out. Manifests cross this boundary as
//! JSON documents only; every failure is classified before it leaves the
//! adapter.

use async_trait::async_trait;
use kintent_core::{
    Change, ClassifiedError, ClusterConfig, ClusterReader, ClusterWriter, ObservedResource,
    ResourceRef,
};
use serde_json::{Map, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub mod classify;

pub use classify::{classify, is_not_found};

/// Extra time granted to the process beyond kubectl's own request timeout.
const PROCESS_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct CommandOutput {
    success: bool,
    stdout: Vec<u8>,
    stderr: String,
}

pub struct KubectlCluster {
    config: ClusterConfig,
}

impl KubectlCluster {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    /// Flags prepended to every invocation.
    fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.config.kubeconfig {
            args.push(format!("--kubeconfig={}", kubeconfig));
        }
        if let Some(context) = &self.config.context {
            args.push(format!("--context={}", context));
        }
        args.push(format!(
            "--request-timeout={}s",
            self.config.request_timeout_secs
        ));
        args
    }

    async fn run(
        &self,
        args: Vec<String>,
        stdin: Option<Vec<u8>>,
    ) -> Result<CommandOutput, ClassifiedError> {
        let mut full = self.global_args();
        full.extend(args);
        debug!(kubectl = %self.config.kubectl, args = ?full, "Running kubectl");

        let mut command = Command::new(&self.config.kubectl);
        command
            .args(&full)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            ClassifiedError::Fatal(format!("failed to run {}: {}", self.config.kubectl, e))
        })?;

        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(&input).await.map_err(|e| {
                ClassifiedError::Retryable(format!("failed to write kubectl stdin: {}", e))
            })?;
        }

        let limit = Duration::from_secs(self.config.request_timeout_secs) + PROCESS_GRACE;
        let output = tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| {
                ClassifiedError::Retryable(format!(
                    "kubectl did not finish within {}s",
                    limit.as_secs()
                ))
            })?
            .map_err(|e| ClassifiedError::Retryable(format!("failed to wait for kubectl: {}", e)))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn write(
        &self,
        change: &Change,
        args: Vec<String>,
        stdin: Option<Vec<u8>>,
    ) -> Result<(), ClassifiedError> {
        let output = self.run(args, stdin).await?;
        if output.success {
            info!(change = %change.describe(), "kubectl write succeeded");
            return Ok(());
        }
        let err = classify(&output.stderr);
        warn!(change = %change.describe(), error = %err, "kubectl write failed");
        Err(err)
    }

    /// kubectl delete has no precondition flag, so compare versions first.
    async fn check_version(
        &self,
        target: &ResourceRef,
        expected: &str,
    ) -> Result<(), ClassifiedError> {
        match self.get(target).await? {
            Some(observed) if observed.resource_version != expected => {
                Err(ClassifiedError::Conflict(format!(
                    "{} has resourceVersion {}, expected {}",
                    target, observed.resource_version, expected
                )))
            }
            Some(_) => Ok(()),
            None => Err(ClassifiedError::Fatal(format!("{} not found", target))),
        }
    }
}

#[async_trait]
impl ClusterReader for KubectlCluster {
    async fn get(&self, target: &ResourceRef) -> Result<Option<ObservedResource>, ClassifiedError> {
        let output = self.run(get_args(target), None).await?;
        if !output.success {
            if is_not_found(&output.stderr) {
                return Ok(None);
            }
            return Err(classify(&output.stderr));
        }

        let object: Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            ClassifiedError::Fatal(format!("unparseable kubectl output for {}: {}", target, e))
        })?;
        ObservedResource::from_kube_json(&object)
            .map(Some)
            .map_err(|e| ClassifiedError::Fatal(format!("{}: {}", target, e)))
    }
}

#[async_trait]
impl ClusterWriter for KubectlCluster {
    async fn apply(&self, change: &Change) -> Result<(), ClassifiedError> {
        match change {
            Change::Create { manifest, .. } => {
                let document = manifest
                    .to_json()
                    .map_err(|e| ClassifiedError::Fatal(e.to_string()))?;
                self.write(change, create_args(), Some(document.into_bytes()))
                    .await
            }
            Change::Update {
                target,
                expected_version,
                patch,
                ..
            } => {
                let body = patch_body(patch, expected_version.as_deref());
                self.write(change, patch_args(target, &body), None).await
            }
            Change::Delete {
                target,
                expected_version,
                ..
            } => {
                if let Some(expected) = expected_version {
                    self.check_version(target, expected).await?;
                }
                self.write(change, delete_args(target), None).await
            }
        }
    }
}

fn target_args(target: &ResourceRef) -> Vec<String> {
    vec![
        target.kind.plural().to_string(),
        target.name.clone(),
        format!("--namespace={}", target.namespace),
    ]
}

fn get_args(target: &ResourceRef) -> Vec<String> {
    let mut args = vec!["get".to_string()];
    args.extend(target_args(target));
    args.push("--output=json".to_string());
    args
}

fn create_args() -> Vec<String> {
    vec!["create".to_string(), "--filename=-".to_string()]
}

fn patch_args(target: &ResourceRef, body: &Value) -> Vec<String> {
    let mut args = vec!["patch".to_string()];
    args.extend(target_args(target));
    args.push("--type=strategic".to_string());
    args.push(format!("--patch={}", body));
    args
}

fn delete_args(target: &ResourceRef) -> Vec<String> {
    let mut args = vec!["delete".to_string()];
    args.extend(target_args(target));
    args.push("--wait=false".to_string());
    args
}

/// The patch sent to the API server. A `metadata.resourceVersion` in a patch
/// makes the server reject it when the object has moved on.
fn patch_body(patch: &Value, expected_version: Option<&str>) -> Value {
    let mut body = patch.clone();
    let Some(expected) = expected_version else {
        return body;
    };
    if !body.is_object() {
        body = Value::Object(Map::new());
    }
    if let Some(object) = body.as_object_mut() {
        let metadata = object
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert(
                "resourceVersion".to_string(),
                Value::String(expected.to_string()),
            );
        }
    }
    body
}
