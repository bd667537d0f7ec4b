//! Error types for intent validation and manifest parsing.

use thiserror::Error;

/// An intent field failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid intent field '{field}': {reason}")]
pub struct IntentError {
    /// Name of the offending field.
    pub field: &'static str,
    /// Why the value was rejected.
    pub reason: String,
}

impl IntentError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// A cluster object could not be read into a typed manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// A required field is absent from the object.
    #[error("missing field '{0}' in cluster object")]
    MissingField(&'static str),

    /// The object's kind is not one kintent manages.
    #[error("unsupported resource kind '{0}'")]
    UnsupportedKind(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error.
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
