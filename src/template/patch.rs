use crate::{
    error::LifecycleError,
    kubeadm::{DocumentKind, Gvk},
};
use anyhow::{ensure, Context, Result};
use serde::Serialize;
use serde_json::Value;

const SYNTHETIC_NAME: &str = "kubeadm-lifecycle-patch-target";

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "patch")]
pub(crate) enum PatchBody {
    /// RFC 6902 operations
    #[serde(rename = "json")]
    Json(json_patch::Patch),
    /// A partial document merged over the target
    #[serde(rename = "strategic")]
    StrategicMerge(Value),
}

/// A user supplied overlay for one kubeadm document
#[derive(Clone, Debug, Serialize)]
pub(crate) struct Patch {
    pub(crate) target: DocumentKind,
    #[serde(flatten)]
    pub(crate) body: PatchBody,
}

impl Patch {
    pub(crate) fn json(target: DocumentKind, operations: Value) -> Result<Self> {
        Ok(Self {
            target,
            body: PatchBody::Json(serde_json::from_value(operations).context("parsing JSON patch operations")?),
        })
    }

    pub(crate) fn strategic_merge(target: DocumentKind, fragment: Value) -> Result<Self> {
        ensure!(fragment.is_object(), "strategic merge patch for {} must be a mapping", target);
        Ok(Self {
            target,
            body: PatchBody::StrategicMerge(fragment),
        })
    }
}

/// Apply every patch aimed at `target` to the single document in `base_yaml`. Merge fragments go
/// first, then all JSON operations run as one concatenated patch. With nothing aimed at the
/// document the input comes back untouched.
pub(crate) fn apply_patches(base_yaml: &str, patches: &[Patch], target: &Gvk) -> Result<String> {
    let relevant = patches
        .iter()
        .filter(|patch| patch.target.kind_name() == target.kind)
        .collect::<Vec<_>>();

    if relevant.is_empty() {
        return Ok(base_yaml.to_string());
    }

    patch_document(base_yaml, &relevant, target).map_err(|source| {
        LifecycleError::PatchApply {
            target: target.to_string(),
            source,
        }
        .into()
    })
}

fn patch_document(base_yaml: &str, patches: &[&Patch], target: &Gvk) -> Result<String> {
    let mut resource: Value = serde_yaml::from_str(base_yaml).context("parsing base document")?;
    let fields = resource.as_object_mut().context("base document is not a mapping")?;

    // Address the document like any other named resource, the name is removed again afterwards
    let synthetic_metadata = !fields.contains_key("metadata");
    if synthetic_metadata {
        fields.insert("metadata".to_string(), serde_json::json!({ "name": SYNTHETIC_NAME }));
    }

    let mut operations = Vec::new();
    for patch in patches {
        match &patch.body {
            PatchBody::StrategicMerge(fragment) => {
                let mut fragment = fragment.clone();
                if let Some(fragment) = fragment.as_object_mut() {
                    for identity in ["apiVersion", "kind", "metadata"] {
                        fragment.remove(identity);
                    }
                }
                json_patch::merge(&mut resource, &fragment);
            }
            PatchBody::Json(patch) => operations.extend(patch.0.iter().cloned()),
        }
    }

    if !operations.is_empty() {
        json_patch::patch(&mut resource, &json_patch::Patch(operations)).context("applying JSON patch")?;
    }

    ensure!(
        resource.get("apiVersion").and_then(Value::as_str) == Some(target.api_version().as_str())
            && resource.get("kind").and_then(Value::as_str) == Some(target.kind),
        "patches must not change apiVersion or kind"
    );

    if synthetic_metadata {
        if let Some(fields) = resource.as_object_mut() {
            fields.remove("metadata");
        }
    }

    serde_yaml::to_string(&resource).context("serializing patched document")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::KubeadmApiVersion;
    use serde_json::json;

    const CLUSTER: &str = "apiVersion: kubeadm.k8s.io/v1beta3\nkind: ClusterConfiguration\nkubernetesVersion: v1.23.0\napiServer:\n  certSANs:\n  - 127.0.0.1\n";

    fn gvk() -> Gvk {
        DocumentKind::Cluster.gvk(KubeadmApiVersion::V1beta3)
    }

    #[test]
    fn test_no_patches_pass_through() -> Result<()> {
        assert_eq!(apply_patches(CLUSTER, &[], &gvk())?, CLUSTER);

        let unrelated = Patch::json(DocumentKind::Init, json!([{"op": "remove", "path": "/skipPhases"}]))?;
        assert_eq!(apply_patches(CLUSTER, &[unrelated], &gvk())?, CLUSTER);
        Ok(())
    }

    #[test]
    fn test_json_and_merge_patches() -> Result<()> {
        let patches = [
            Patch::json(
                DocumentKind::Cluster,
                json!([{"op": "add", "path": "/apiServer/certSANs/-", "value": "lb.example.com"}]),
            )?,
            Patch::strategic_merge(
                DocumentKind::Cluster,
                json!({"kind": "ClusterConfiguration", "imageRepository": "sealos.hub:5000"}),
            )?,
            Patch::json(
                DocumentKind::Cluster,
                json!([{"op": "replace", "path": "/kubernetesVersion", "value": "v1.23.4"}]),
            )?,
        ];

        let patched: Value = serde_yaml::from_str(&apply_patches(CLUSTER, &patches, &gvk())?)?;

        assert_eq!(
            patched,
            json!({
                "apiVersion": "kubeadm.k8s.io/v1beta3",
                "kind": "ClusterConfiguration",
                "kubernetesVersion": "v1.23.4",
                "apiServer": {"certSANs": ["127.0.0.1", "lb.example.com"]},
                "imageRepository": "sealos.hub:5000",
            })
        );
        Ok(())
    }

    #[test]
    fn test_failed_patch_is_patch_apply_error() -> Result<()> {
        let patches = [Patch::json(
            DocumentKind::Cluster,
            json!([{"op": "remove", "path": "/controllerManager/extraArgs"}]),
        )?];

        let err = apply_patches(CLUSTER, &patches, &gvk()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LifecycleError>(),
            Some(LifecycleError::PatchApply { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_patch_cannot_change_kind() -> Result<()> {
        let patches = [Patch::json(
            DocumentKind::Cluster,
            json!([{"op": "replace", "path": "/kind", "value": "InitConfiguration"}]),
        )?];

        assert!(apply_patches(CLUSTER, &patches, &gvk()).is_err());
        Ok(())
    }
}
