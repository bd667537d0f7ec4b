//! Reading intent documents from disk.
//!
//! Intent files are JSON (`.json`) or YAML (`.yaml`, `.yml`). They are checked
//! against the embedded intent schema first so that every problem is reported
//! with its location, then deserialized into a validated [`Intent`].

use anyhow::{Context, Result, anyhow, bail};
use kintent_core::Intent;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;

const INTENT_SCHEMA: &str = include_str!("../../../../schemas/Intent.schema.json");

/// Load and validate the intent at `path`.
pub fn load_intent(path: &Path) -> Result<Intent> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read intent file {}", path.display()))?;

    let document: JsonValue = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON in {}", path.display()))?,
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in {}", path.display()))?,
        _ => bail!(
            "Unsupported intent file '{}': expected .json, .yaml or .yml",
            path.display()
        ),
    };

    validate_document(&document)
        .with_context(|| format!("Invalid intent file {}", path.display()))?;

    serde_json::from_value(document)
        .with_context(|| format!("Invalid intent file {}", path.display()))
}

/// Check a parsed document against the intent schema, collecting every issue.
pub fn validate_document(document: &JsonValue) -> Result<()> {
    let schema: JsonValue =
        serde_json::from_str(INTENT_SCHEMA).context("Embedded intent schema is not valid JSON")?;
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| anyhow!("Failed to compile intent schema: {}", e))?;

    let problems: Vec<String> = validator
        .iter_errors(document)
        .map(|error| {
            let path = error.instance_path().to_string();
            let location = if path.is_empty() {
                "(root)".to_string()
            } else {
                path
            };
            format!("{}: {}", location, error)
        })
        .collect();

    if problems.is_empty() {
        Ok(())
    } else {
        bail!("{}", problems.join("\n"))
    }
}
