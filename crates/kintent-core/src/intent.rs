//! Validated intents.
//!
//! An [`Intent`] is the only input the reconcile core accepts. Front-ends
//! (an LLM agent, the CLI, an API) build an [`IntentSpec`] and convert it with
//! [`IntentSpec::build`]; deserialization goes through the same validation, so
//! an `Intent` value always satisfies its invariants.

use crate::error::IntentError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use uuid::Uuid;

/// Namespace used when the producer does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";
/// Replica count for a new deployment when none is given.
pub const DEFAULT_REPLICAS: i32 = 1;
/// Container port for a new deployment when none is given.
pub const DEFAULT_PORT: u16 = 80;

/// Label key the compiler owns; producers may not override it.
pub const APP_LABEL: &str = "app";

static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("static regex")
});

static LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?)?$").expect("static regex")
});

/// What the intent asks the cluster to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateDeployment,
    ScaleDeployment,
    DeleteDeployment,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::CreateDeployment => write!(f, "create_deployment"),
            Action::ScaleDeployment => write!(f, "scale_deployment"),
            Action::DeleteDeployment => write!(f, "delete_deployment"),
        }
    }
}

/// Unvalidated wire form of an intent.
///
/// This is what front-ends produce and what intent files contain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntentSpec {
    /// Correlation id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub action: Action,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    /// Extra labels for created deployments.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl IntentSpec {
    fn new(action: Action, name: impl Into<String>) -> Self {
        Self {
            id: None,
            action,
            name: name.into(),
            image: None,
            replicas: None,
            namespace: None,
            port: None,
            labels: BTreeMap::new(),
        }
    }

    /// Start a `create_deployment` intent.
    pub fn create(name: impl Into<String>, image: impl Into<String>) -> Self {
        let mut spec = Self::new(Action::CreateDeployment, name);
        spec.image = Some(image.into());
        spec
    }

    /// Start a `scale_deployment` intent.
    pub fn scale(name: impl Into<String>, replicas: i64) -> Self {
        let mut spec = Self::new(Action::ScaleDeployment, name);
        spec.replicas = Some(replicas);
        spec
    }

    /// Start a `delete_deployment` intent.
    pub fn delete(name: impl Into<String>) -> Self {
        Self::new(Action::DeleteDeployment, name)
    }

    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn replicas(mut self, replicas: i64) -> Self {
        self.replicas = Some(replicas);
        self
    }

    pub fn port(mut self, port: i64) -> Self {
        self.port = Some(port);
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Validate and freeze the intent.
    pub fn build(self) -> Result<Intent, IntentError> {
        Intent::try_from(self)
    }
}

/// A validated, immutable request for one cluster mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IntentSpec", into = "IntentSpec")]
pub struct Intent {
    id: Uuid,
    action: Action,
    name: String,
    image: Option<String>,
    replicas: Option<i32>,
    namespace: String,
    port: Option<u16>,
    labels: BTreeMap<String, String>,
}

impl Intent {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn replicas(&self) -> Option<i32> {
        self.replicas
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Short human-readable form used in logs and audit details.
    pub fn summary(&self) -> String {
        match self.action {
            Action::CreateDeployment => format!(
                "create {}/{} image={} replicas={}",
                self.namespace,
                self.name,
                self.image.as_deref().unwrap_or_default(),
                self.replicas.unwrap_or(DEFAULT_REPLICAS),
            ),
            Action::ScaleDeployment => format!(
                "scale {}/{} to {}",
                self.namespace,
                self.name,
                self.replicas.unwrap_or_default()
            ),
            Action::DeleteDeployment => format!("delete {}/{}", self.namespace, self.name),
        }
    }
}

/// Check a value against the RFC 1123 label rules the cluster enforces for names.
pub fn validate_dns_label(field: &'static str, value: &str) -> Result<(), IntentError> {
    if value.is_empty() {
        return Err(IntentError::new(field, "must not be empty"));
    }
    if value.len() > 63 {
        return Err(IntentError::new(field, "must be at most 63 characters"));
    }
    if !DNS_LABEL.is_match(value) {
        return Err(IntentError::new(
            field,
            format!(
                "'{}' must consist of lowercase alphanumerics or '-', and start and end with an alphanumeric",
                value
            ),
        ));
    }
    Ok(())
}

fn validate_labels(labels: &BTreeMap<String, String>, name: &str) -> Result<(), IntentError> {
    for (key, value) in labels {
        let key_name = key.rsplit('/').next().unwrap_or(key);
        if key_name.is_empty() || key_name.len() > 63 || !LABEL_VALUE.is_match(key_name) {
            return Err(IntentError::new("labels", format!("invalid label key '{}'", key)));
        }
        if value.len() > 63 || !LABEL_VALUE.is_match(value) {
            return Err(IntentError::new(
                "labels",
                format!("invalid value '{}' for label '{}'", value, key),
            ));
        }
        if key == APP_LABEL && value != name {
            return Err(IntentError::new(
                "labels",
                format!("label '{}' is reserved and must equal the deployment name", APP_LABEL),
            ));
        }
    }
    Ok(())
}

fn validate_replicas(value: i64) -> Result<i32, IntentError> {
    if value < 0 {
        return Err(IntentError::new("replicas", format!("must be >= 0, got {}", value)));
    }
    i32::try_from(value).map_err(|_| IntentError::new("replicas", "out of range"))
}

fn validate_port(value: i64) -> Result<u16, IntentError> {
    match u16::try_from(value) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(IntentError::new(
            "port",
            format!("must be between 1 and 65535, got {}", value),
        )),
    }
}

fn reject_field<T>(field: &'static str, value: &Option<T>, action: Action) -> Result<(), IntentError> {
    if value.is_some() {
        return Err(IntentError::new(
            field,
            format!("not accepted for action {}", action),
        ));
    }
    Ok(())
}

impl TryFrom<IntentSpec> for Intent {
    type Error = IntentError;

    fn try_from(spec: IntentSpec) -> Result<Self, Self::Error> {
        validate_dns_label("name", &spec.name)?;
        let namespace = spec
            .namespace
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        validate_dns_label("namespace", &namespace)?;

        let (image, replicas, port) = match spec.action {
            Action::CreateDeployment => {
                let image = spec
                    .image
                    .filter(|i| !i.trim().is_empty())
                    .ok_or_else(|| IntentError::new("image", "required for create_deployment"))?;
                if image.chars().any(char::is_whitespace) {
                    return Err(IntentError::new("image", "must not contain whitespace"));
                }
                let replicas = validate_replicas(spec.replicas.unwrap_or(DEFAULT_REPLICAS as i64))?;
                let port = validate_port(spec.port.unwrap_or(DEFAULT_PORT as i64))?;
                validate_labels(&spec.labels, &spec.name)?;
                (Some(image), Some(replicas), Some(port))
            }
            Action::ScaleDeployment => {
                reject_field("image", &spec.image, spec.action)?;
                reject_field("port", &spec.port, spec.action)?;
                let replicas = spec
                    .replicas
                    .ok_or_else(|| IntentError::new("replicas", "required for scale_deployment"))?;
                (None, Some(validate_replicas(replicas)?), None)
            }
            Action::DeleteDeployment => {
                reject_field("image", &spec.image, spec.action)?;
                reject_field("port", &spec.port, spec.action)?;
                reject_field("replicas", &spec.replicas, spec.action)?;
                (None, None, None)
            }
        };

        if spec.action != Action::CreateDeployment && !spec.labels.is_empty() {
            return Err(IntentError::new(
                "labels",
                format!("not accepted for action {}", spec.action),
            ));
        }

        Ok(Intent {
            id: spec.id.unwrap_or_else(Uuid::new_v4),
            action: spec.action,
            name: spec.name,
            image,
            replicas,
            namespace,
            port,
            labels: spec.labels,
        })
    }
}

impl From<Intent> for IntentSpec {
    fn from(intent: Intent) -> Self {
        IntentSpec {
            id: Some(intent.id),
            action: intent.action,
            name: intent.name,
            image: intent.image,
            replicas: intent.replicas.map(i64::from),
            namespace: Some(intent.namespace),
            port: intent.port.map(i64::from),
            labels: intent.labels,
        }
    }
}
