use super::DocumentKind;
use crate::version::KubeadmApiVersion;
use anyhow::{bail, Result};
use std::collections::HashMap;
use strum::IntoEnumIterator;

/// Where a decoded document came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Registered {
    pub(crate) kind: DocumentKind,
    /// Only set for the kubeadm.k8s.io group, the component config groups have a single version
    pub(crate) kubeadm_version: Option<KubeadmApiVersion>,
}

/// The set of document kinds and group versions the loader understands. Built once at startup
/// and shared by reference, nothing registers into it afterwards.
pub(crate) struct TypeRegistry {
    kinds: HashMap<&'static str, DocumentKind>,
}

impl TypeRegistry {
    pub(crate) fn new() -> Self {
        Self {
            kinds: DocumentKind::iter().map(|kind| (kind.kind_name(), kind)).collect(),
        }
    }

    /// Unknown kinds resolve to `None` so foreign documents in the same stream are skipped. A known
    /// kind in a group version we can't decode is an error.
    pub(crate) fn resolve(&self, api_version: &str, kind: &str) -> Result<Option<Registered>> {
        let Some(&document_kind) = self.kinds.get(kind) else {
            return Ok(None);
        };

        let Some((group, version)) = api_version.split_once('/') else {
            bail!("{} has malformed apiVersion {:?}", kind, api_version);
        };

        if group != document_kind.group() {
            bail!("{} does not belong to group {}", kind, group);
        }

        let kubeadm_version = match document_kind.fixed_version() {
            Some(fixed) if fixed == version => None,
            Some(fixed) => bail!("{} {} is not supported, only {}/{}", kind, api_version, group, fixed),
            None => match api_version.parse::<KubeadmApiVersion>() {
                Ok(parsed) => Some(parsed),
                Err(_) => bail!("{} {} is not a supported kubeadm API version", kind, api_version),
            },
        };

        Ok(Some(Registered {
            kind: document_kind,
            kubeadm_version,
        }))
    }
}
