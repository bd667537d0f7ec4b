//! Structured resource manifests and observed cluster state.
//!
//! Manifests stay structured inside the workspace. Text only appears at the
//! edge via [`Manifest::to_yaml`] / [`Manifest::to_json`] and
//! [`ObservedResource::from_kube_json`].

use crate::error::ManifestError;
use crate::intent::Intent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;

/// Resource kinds kintent knows how to reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Deployment,
}

impl ResourceKind {
    pub fn api_version(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "apps/v1",
        }
    }

    /// Plural resource name as used by the API and kubectl.
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "deployments",
        }
    }

    pub fn parse(kind: &str) -> Result<Self, ManifestError> {
        match kind {
            "Deployment" => Ok(ResourceKind::Deployment),
            other => Err(ManifestError::UnsupportedKind(other.to_string())),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Deployment => write!(f, "Deployment"),
        }
    }
}

/// Identity of a namespaced resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn deployment(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Deployment, namespace, name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// The metadata subset kintent manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A structured cluster resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub api_version: String,
    pub kind: ResourceKind,
    pub metadata: ObjectMeta,
    /// Resource spec as a JSON object.
    pub spec: Value,
}

impl Manifest {
    pub fn new(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: Value,
    ) -> Self {
        Self {
            api_version: kind.api_version().to_string(),
            kind,
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                labels: BTreeMap::new(),
            },
            spec,
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.metadata.labels = labels;
        self
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(
            self.kind,
            self.metadata.namespace.clone(),
            self.metadata.name.clone(),
        )
    }

    /// The fields reconciliation compares: `metadata.labels` (when set) and `spec`.
    pub fn body(&self) -> Value {
        let mut body = Map::new();
        if !self.metadata.labels.is_empty() {
            body.insert("metadata".to_string(), json!({ "labels": self.metadata.labels }));
        }
        body.insert("spec".to_string(), self.spec.clone());
        Value::Object(body)
    }

    /// Replace labels and spec from a body produced by [`Manifest::body`].
    pub fn set_body(&mut self, body: &Value) {
        self.metadata.labels = body
            .pointer("/metadata/labels")
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        self.spec = body.get("spec").cloned().unwrap_or_else(|| json!({}));
    }

    /// `spec.replicas`, when present.
    pub fn replicas(&self) -> Option<i64> {
        self.spec.get("replicas").and_then(Value::as_i64)
    }

    /// Canonical YAML document for the transport boundary.
    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Canonical JSON document for the transport boundary.
    pub fn to_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A resource as currently stored in the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedResource {
    pub manifest: Manifest,
    /// Opaque version used as the optimistic-concurrency precondition.
    pub resource_version: String,
    /// `metadata.generation`: bumped on every spec change.
    pub generation: i64,
    /// `status.observedGeneration`: the generation the controller has acted on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Whether a deletion is in progress.
    #[serde(default)]
    pub terminating: bool,
}

impl ObservedResource {
    pub fn resource_ref(&self) -> ResourceRef {
        self.manifest.resource_ref()
    }

    /// Why this resource must not be diffed against right now, if anything.
    pub fn conflict_reason(&self) -> Option<String> {
        if self.terminating {
            return Some("resource is being deleted".to_string());
        }
        match self.observed_generation {
            Some(observed) if observed == self.generation => None,
            Some(observed) => Some(format!(
                "rollout in progress: generation {} observed {}",
                self.generation, observed
            )),
            None => Some(format!(
                "rollout in progress: generation {} not yet observed",
                self.generation
            )),
        }
    }

    /// Parse a Kubernetes API object (as printed by `kubectl get -o json`).
    pub fn from_kube_json(object: &Value) -> Result<Self, ManifestError> {
        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .ok_or(ManifestError::MissingField("kind"))?;
        let kind = ResourceKind::parse(kind)?;
        let api_version = object
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or(kind.api_version());

        let metadata = object
            .get("metadata")
            .ok_or(ManifestError::MissingField("metadata"))?;
        let name = metadata
            .get("name")
            .and_then(Value::as_str)
            .ok_or(ManifestError::MissingField("metadata.name"))?;
        let namespace = metadata
            .get("namespace")
            .and_then(Value::as_str)
            .unwrap_or(crate::intent::DEFAULT_NAMESPACE);
        let resource_version = metadata
            .get("resourceVersion")
            .and_then(Value::as_str)
            .ok_or(ManifestError::MissingField("metadata.resourceVersion"))?;
        let generation = metadata
            .get("generation")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let labels = metadata
            .get("labels")
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let spec = object.get("spec").cloned().unwrap_or_else(|| json!({}));
        let observed_generation = object
            .pointer("/status/observedGeneration")
            .and_then(Value::as_i64);

        Ok(Self {
            manifest: Manifest {
                api_version: api_version.to_string(),
                kind,
                metadata: ObjectMeta {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    labels,
                },
                spec,
            },
            resource_version: resource_version.to_string(),
            generation,
            observed_generation,
            terminating: metadata.get("deletionTimestamp").is_some_and(|v| !v.is_null()),
        })
    }
}

/// What the compiler wants to be true of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "resource", rename_all = "snake_case")]
pub enum DesiredResource {
    /// The resource must exist with at least these fields.
    Apply(Manifest),
    /// The resource must already exist; only these fields are driven.
    Patch(Manifest),
    /// The resource must not exist.
    Absent(ResourceRef),
}

impl DesiredResource {
    pub fn resource_ref(&self) -> ResourceRef {
        match self {
            DesiredResource::Apply(m) | DesiredResource::Patch(m) => m.resource_ref(),
            DesiredResource::Absent(r) => r.clone(),
        }
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        match self {
            DesiredResource::Apply(m) | DesiredResource::Patch(m) => Some(m),
            DesiredResource::Absent(_) => None,
        }
    }
}

/// Compiler output for one intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestSet {
    pub intent: Intent,
    pub resources: Vec<DesiredResource>,
}

impl ManifestSet {
    pub fn resource_refs(&self) -> Vec<ResourceRef> {
        self.resources.iter().map(DesiredResource::resource_ref).collect()
    }
}

/// Observed state of a set of resources at one point in time.
///
/// A `None` entry records that the resource was looked up and not found.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSnapshot {
    pub taken_at: DateTime<Utc>,
    pub resources: BTreeMap<ResourceRef, Option<ObservedResource>>,
}

impl ClusterSnapshot {
    pub fn new() -> Self {
        Self {
            taken_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }

    /// Record the result of looking up `target`.
    pub fn record(&mut self, target: ResourceRef, observed: Option<ObservedResource>) {
        self.resources.insert(target, observed);
    }

    pub fn with(mut self, observed: ObservedResource) -> Self {
        self.record(observed.resource_ref(), Some(observed));
        self
    }

    pub fn get(&self, target: &ResourceRef) -> Option<&ObservedResource> {
        self.resources.get(target).and_then(Option::as_ref)
    }
}

impl Default for ClusterSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kube_object() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "default",
                "labels": {"app": "web"},
                "resourceVersion": "4711",
                "generation": 3,
                "uid": "abc"
            },
            "spec": {"replicas": 2},
            "status": {"observedGeneration": 3, "readyReplicas": 2}
        })
    }

    #[test]
    fn test_from_kube_json() {
        let observed = ObservedResource::from_kube_json(&kube_object()).unwrap();
        assert_eq!(observed.resource_version, "4711");
        assert_eq!(observed.generation, 3);
        assert_eq!(observed.observed_generation, Some(3));
        assert_eq!(observed.manifest.replicas(), Some(2));
        assert_eq!(observed.manifest.metadata.labels["app"], "web");
        assert!(observed.conflict_reason().is_none());
    }

    #[test]
    fn test_generation_mismatch_is_conflict() {
        let mut object = kube_object();
        object["metadata"]["generation"] = json!(4);
        let observed = ObservedResource::from_kube_json(&object).unwrap();
        assert!(observed.conflict_reason().unwrap().contains("rollout in progress"));
    }

    #[test]
    fn test_terminating_is_conflict() {
        let mut object = kube_object();
        object["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
        let observed = ObservedResource::from_kube_json(&object).unwrap();
        assert!(observed.terminating);
        assert!(observed.conflict_reason().is_some());
    }

    #[test]
    fn test_unsupported_kind() {
        let mut object = kube_object();
        object["kind"] = json!("StatefulSet");
        assert!(matches!(
            ObservedResource::from_kube_json(&object),
            Err(ManifestError::UnsupportedKind(_))
        ));
    }

    #[test]
    fn test_yaml_boundary() {
        let manifest = Manifest::new(
            ResourceKind::Deployment,
            "default",
            "web",
            json!({"replicas": 1}),
        );
        let yaml = manifest.to_yaml().unwrap();
        assert!(yaml.contains("apiVersion: apps/v1"));
        assert!(yaml.contains("kind: Deployment"));
        assert!(!yaml.contains("labels"));
    }

    #[test]
    fn test_body_round_trip() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "web".to_string());
        let manifest = Manifest::new(ResourceKind::Deployment, "default", "web", json!({"replicas": 2}))
            .with_labels(labels);

        let mut copy = Manifest::new(ResourceKind::Deployment, "default", "web", json!({}));
        copy.set_body(&manifest.body());
        assert_eq!(copy, manifest);
    }
}
