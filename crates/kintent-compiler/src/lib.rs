//! # kintent-compiler
//!
//! Turns a validated [`Intent`] into the [`ManifestSet`] describing the
//! cluster state it asks for. Compilation is pure and deterministic: the same
//! intent always yields the same manifests, and nothing here touches the
//! cluster.

use kintent_core::intent::{APP_LABEL, DEFAULT_PORT, DEFAULT_REPLICAS, validate_dns_label};
use kintent_core::{
    Action, DesiredResource, Intent, Manifest, ManifestSet, ResourceKind, ResourceRef,
};
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("no compiler enabled for action {0}")]
    UnsupportedAction(Action),
}

impl From<kintent_core::IntentError> for CompileError {
    fn from(err: kintent_core::IntentError) -> Self {
        CompileError::InvalidField {
            field: err.field,
            reason: err.reason,
        }
    }
}

/// Compile with every action enabled.
pub fn compile(intent: &Intent) -> Result<ManifestSet, CompileError> {
    ManifestCompiler::default().compile(intent)
}

/// Intent compiler, optionally restricted to a subset of actions.
#[derive(Debug, Clone)]
pub struct ManifestCompiler {
    enabled: Vec<Action>,
}

impl Default for ManifestCompiler {
    fn default() -> Self {
        Self {
            enabled: vec![
                Action::CreateDeployment,
                Action::ScaleDeployment,
                Action::DeleteDeployment,
            ],
        }
    }
}

impl ManifestCompiler {
    /// A compiler that only accepts the given actions.
    pub fn only(actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            enabled: actions.into_iter().collect(),
        }
    }

    pub fn compile(&self, intent: &Intent) -> Result<ManifestSet, CompileError> {
        if !self.enabled.contains(&intent.action()) {
            return Err(CompileError::UnsupportedAction(intent.action()));
        }

        validate_dns_label("name", intent.name())?;
        validate_dns_label("namespace", intent.namespace())?;

        let resource = match intent.action() {
            Action::CreateDeployment => DesiredResource::Apply(deployment(intent)?),
            Action::ScaleDeployment => DesiredResource::Patch(scale(intent)?),
            Action::DeleteDeployment => DesiredResource::Absent(ResourceRef::deployment(
                intent.namespace(),
                intent.name(),
            )),
        };

        tracing::debug!(
            intent_id = %intent.id(),
            action = %intent.action(),
            target = %resource.resource_ref(),
            "Compiled intent"
        );

        Ok(ManifestSet {
            intent: intent.clone(),
            resources: vec![resource],
        })
    }
}

fn deployment(intent: &Intent) -> Result<Manifest, CompileError> {
    let image = intent
        .image()
        .filter(|image| !image.trim().is_empty())
        .ok_or_else(|| CompileError::InvalidField {
            field: "image",
            reason: "required for create_deployment".to_string(),
        })?;
    let replicas = intent.replicas().unwrap_or(DEFAULT_REPLICAS);
    if replicas < 0 {
        return Err(CompileError::InvalidField {
            field: "replicas",
            reason: format!("must be >= 0, got {}", replicas),
        });
    }
    let port = intent.port().unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(CompileError::InvalidField {
            field: "port",
            reason: "must be between 1 and 65535, got 0".to_string(),
        });
    }

    let mut labels: BTreeMap<String, String> = intent.labels().clone();
    labels.insert(APP_LABEL.to_string(), intent.name().to_string());

    let spec = json!({
        "replicas": replicas,
        "selector": { "matchLabels": { APP_LABEL: intent.name() } },
        "template": {
            "metadata": { "labels": labels },
            "spec": {
                "containers": [{
                    "name": intent.name(),
                    "image": image,
                    "ports": [{ "containerPort": port }]
                }]
            }
        }
    });

    Ok(Manifest::new(
        ResourceKind::Deployment,
        intent.namespace(),
        intent.name(),
        spec,
    )
    .with_labels(labels))
}

fn scale(intent: &Intent) -> Result<Manifest, CompileError> {
    let replicas = intent.replicas().ok_or_else(|| CompileError::InvalidField {
        field: "replicas",
        reason: "required for scale_deployment".to_string(),
    })?;
    if replicas < 0 {
        return Err(CompileError::InvalidField {
            field: "replicas",
            reason: format!("must be >= 0, got {}", replicas),
        });
    }
    Ok(Manifest::new(
        ResourceKind::Deployment,
        intent.namespace(),
        intent.name(),
        json!({ "replicas": replicas }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kintent_core::IntentSpec;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_web_deployment() {
        let intent = IntentSpec::create("web", "nginx:1.25")
            .replicas(2)
            .build()
            .unwrap();
        let set = compile(&intent).unwrap();
        assert_eq!(set.resources.len(), 1);

        let DesiredResource::Apply(manifest) = &set.resources[0] else {
            panic!("expected apply, got {:?}", set.resources[0]);
        };
        assert_eq!(manifest.api_version, "apps/v1");
        assert_eq!(manifest.metadata.namespace, "default");
        assert_eq!(manifest.metadata.labels["app"], "web");
        assert_eq!(
            manifest.spec,
            json!({
                "replicas": 2,
                "selector": {"matchLabels": {"app": "web"}},
                "template": {
                    "metadata": {"labels": {"app": "web"}},
                    "spec": {
                        "containers": [{
                            "name": "web",
                            "image": "nginx:1.25",
                            "ports": [{"containerPort": 80}]
                        }]
                    }
                }
            })
        );
    }

    #[test]
    fn test_compile_is_deterministic() {
        let intent = IntentSpec::create("api", "ghcr.io/acme/api:3")
            .namespace("shop")
            .port(8080)
            .label("tier", "backend")
            .label("team", "payments")
            .build()
            .unwrap();
        let first = compile(&intent).unwrap();
        let second = compile(&intent).unwrap();
        assert_eq!(first, second);

        let yaml_a = first.resources[0].manifest().unwrap().to_yaml().unwrap();
        let yaml_b = second.resources[0].manifest().unwrap().to_yaml().unwrap();
        assert_eq!(yaml_a, yaml_b);
    }

    #[test]
    fn test_extra_labels_reach_template() {
        let intent = IntentSpec::create("api", "api:1")
            .label("tier", "backend")
            .build()
            .unwrap();
        let set = compile(&intent).unwrap();
        let manifest = set.resources[0].manifest().unwrap();
        assert_eq!(
            manifest.spec.pointer("/template/metadata/labels/tier"),
            Some(&json!("backend"))
        );
        assert_eq!(manifest.metadata.labels["tier"], "backend");
        // Selector stays on the immutable app label only.
        assert_eq!(
            manifest.spec.pointer("/selector/matchLabels"),
            Some(&json!({"app": "api"}))
        );
    }

    #[test]
    fn test_scale_is_patch_of_replicas_only() {
        let intent = IntentSpec::scale("web", 0).build().unwrap();
        let set = compile(&intent).unwrap();
        let DesiredResource::Patch(manifest) = &set.resources[0] else {
            panic!("expected patch");
        };
        assert_eq!(manifest.spec, json!({"replicas": 0}));
        assert!(manifest.metadata.labels.is_empty());
    }

    #[test]
    fn test_delete_is_absent() {
        let intent = IntentSpec::delete("web").namespace("shop").build().unwrap();
        let set = compile(&intent).unwrap();
        assert_eq!(
            set.resources,
            vec![DesiredResource::Absent(ResourceRef::deployment("shop", "web"))]
        );
    }

    #[test]
    fn test_disabled_action_is_unsupported() {
        let compiler = ManifestCompiler::only([Action::CreateDeployment]);
        let intent = IntentSpec::delete("web").build().unwrap();
        assert_eq!(
            compiler.compile(&intent),
            Err(CompileError::UnsupportedAction(Action::DeleteDeployment))
        );
    }

    #[test]
    fn test_manifest_yaml_shape() {
        let intent = IntentSpec::create("web", "nginx").build().unwrap();
        let set = compile(&intent).unwrap();
        let yaml = set.resources[0].manifest().unwrap().to_yaml().unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(doc["kind"].as_str(), Some("Deployment"));
        assert_eq!(doc["spec"]["replicas"].as_i64(), Some(1));
        assert_eq!(
            doc["spec"]["template"]["spec"]["containers"][0]["ports"][0]["containerPort"].as_i64(),
            Some(80)
        );
    }
}
