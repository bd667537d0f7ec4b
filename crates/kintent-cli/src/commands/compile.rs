//! `kintent compile`: print the manifests an intent compiles to.

use anyhow::Result;
use kintent_core::{DesiredResource, ManifestSet};
use std::path::Path;

use super::input::load_intent;

pub fn run(intent_path: &Path) -> Result<()> {
    let intent = load_intent(intent_path)?;
    let manifests = kintent_compiler::compile(&intent)?;
    print!("{}", render(&manifests)?);
    Ok(())
}

/// Render a manifest set as a multi-document YAML stream.
///
/// Resources that must be absent have no manifest and are rendered as a
/// comment naming the target.
pub fn render(manifests: &ManifestSet) -> Result<String> {
    let mut out = String::new();
    for (idx, resource) in manifests.resources.iter().enumerate() {
        if idx > 0 {
            out.push_str("---\n");
        }
        match resource {
            DesiredResource::Apply(manifest) => out.push_str(&manifest.to_yaml()?),
            DesiredResource::Patch(manifest) => {
                out.push_str("# patch: only the fields below are driven\n");
                out.push_str(&manifest.to_yaml()?);
            }
            DesiredResource::Absent(target) => {
                out.push_str(&format!("# absent: {}\n", target));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kintent_core::IntentSpec;

    #[test]
    fn test_render_web_deployment() {
        let intent = IntentSpec::create("web", "nginx:1.25").build().unwrap();
        let yaml = render(&kintent_compiler::compile(&intent).unwrap()).unwrap();

        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(doc["apiVersion"].as_str(), Some("apps/v1"));
        assert_eq!(doc["kind"].as_str(), Some("Deployment"));
        assert_eq!(doc["metadata"]["name"].as_str(), Some("web"));
        assert_eq!(doc["spec"]["replicas"].as_i64(), Some(1));
        assert_eq!(
            doc["spec"]["template"]["spec"]["containers"][0]["image"].as_str(),
            Some("nginx:1.25")
        );
    }

    #[test]
    fn test_render_delete() {
        let intent = IntentSpec::delete("web").namespace("shop").build().unwrap();
        let out = render(&kintent_compiler::compile(&intent).unwrap()).unwrap();
        assert_eq!(out, "# absent: Deployment/shop/web\n");
    }
}
