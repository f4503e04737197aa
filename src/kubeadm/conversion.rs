use super::DocumentKind;
use crate::version::KubeadmApiVersion;
use anyhow::{ensure, Result};
use serde_json::Value;

// Documents are held in the newest shape (v1beta3) internally. Older documents are upgraded when
// decoded and the canonical shape is downgraded again when rendering for an older cluster.

/// Fields each API generation introduced, keyed by the first version that has them
const INTRODUCED: &[(KubeadmApiVersion, DocumentKind, &str)] = &[
    (KubeadmApiVersion::V1beta2, DocumentKind::Init, "/certificateKey"),
    (KubeadmApiVersion::V1beta2, DocumentKind::Init, "/nodeRegistration/ignorePreflightErrors"),
    (KubeadmApiVersion::V1beta2, DocumentKind::Join, "/controlPlane/certificateKey"),
    (KubeadmApiVersion::V1beta2, DocumentKind::Join, "/nodeRegistration/ignorePreflightErrors"),
    (KubeadmApiVersion::V1beta3, DocumentKind::Init, "/skipPhases"),
    (KubeadmApiVersion::V1beta3, DocumentKind::Init, "/nodeRegistration/imagePullPolicy"),
    (KubeadmApiVersion::V1beta3, DocumentKind::Init, "/patches"),
    (KubeadmApiVersion::V1beta3, DocumentKind::Join, "/skipPhases"),
    (KubeadmApiVersion::V1beta3, DocumentKind::Join, "/nodeRegistration/imagePullPolicy"),
    (KubeadmApiVersion::V1beta3, DocumentKind::Join, "/patches"),
];

/// Fields each API generation removed, keyed by the first version that no longer has them
const REMOVED: &[(KubeadmApiVersion, DocumentKind, &str)] = &[
    (KubeadmApiVersion::V1beta3, DocumentKind::Cluster, "/dns/type"),
    (KubeadmApiVersion::V1beta3, DocumentKind::Cluster, "/useHyperKubeImage"),
];

/// Bring a document authored against `from` up to the canonical shape
pub(crate) fn upgrade(kind: DocumentKind, from: KubeadmApiVersion, document: &mut Value) -> Result<()> {
    ensure!(document.is_object(), "{} is not a mapping", kind);

    for (version, removed_kind, pointer) in REMOVED {
        if *removed_kind == kind && from < *version {
            remove_pointer(document, pointer);
        }
    }

    Ok(())
}

/// Strip the canonical fields `to` does not understand yet
pub(crate) fn downgrade(kind: DocumentKind, to: KubeadmApiVersion, document: &mut Value) -> Result<()> {
    ensure!(document.is_object(), "{} is not a mapping", kind);

    for (version, introduced_kind, pointer) in INTRODUCED {
        if *introduced_kind == kind && to < *version {
            remove_pointer(document, pointer);
        }
    }

    Ok(())
}

fn remove_pointer(document: &mut Value, pointer: &str) {
    let Some((parent, key)) = pointer.rsplit_once('/') else {
        return;
    };

    let removed = match document.pointer_mut(parent) {
        Some(Value::Object(parent)) => parent.remove(key).is_some(),
        _ => false,
    };

    if removed {
        log::trace!("dropped {} during kubeadm API conversion", pointer);
    }
}
