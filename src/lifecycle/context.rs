use crate::{kubeadm::KubeadmConfig, remote::Host, token::Token, version::KubeadmApiVersion};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Container runtime facts detected on one host
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CriSettings {
    pub(crate) socket: String,
    pub(crate) cgroup_driver: String,
}

/// Masters and worker nodes a pipeline works on. The first master is master0, the one that
/// runs `kubeadm init`, hands out tokens and answers kubectl.
#[derive(Clone, Debug)]
pub(crate) struct Topology {
    pub(crate) masters: Vec<Host>,
    pub(crate) nodes: Vec<Host>,
}

impl Topology {
    pub(crate) fn master0(&self) -> Result<&Host> {
        self.masters.first().context("cluster has no masters")
    }

    pub(crate) fn master_ips(&self) -> Vec<String> {
        self.masters.iter().map(|master| master.ip.clone()).collect()
    }

    pub(crate) fn host_count(&self) -> usize {
        self.masters.len() + self.nodes.len()
    }
}

/// The state one pipeline step hands to the next. Steps never mutate it; they build a new one
/// with the `with_*` methods, and per-host config generation works on a private copy from
/// `derive_config`, so concurrent workers never share a mutable config.
#[derive(Clone, Debug)]
pub(crate) struct OperationContext {
    pub(crate) kube_version: String,
    kubeadm: Arc<KubeadmConfig>,
    pub(crate) token: Option<Token>,
    pub(crate) certificate_key: Option<String>,
    pub(crate) cri: Option<CriSettings>,
}

impl OperationContext {
    pub(crate) fn new(kube_version: &str, kubeadm: KubeadmConfig) -> Self {
        Self {
            kube_version: kube_version.to_string(),
            kubeadm: Arc::new(kubeadm),
            token: None,
            certificate_key: None,
            cri: None,
        }
    }

    pub(crate) fn kubeadm(&self) -> &KubeadmConfig {
        &self.kubeadm
    }

    pub(crate) fn api_version(&self) -> KubeadmApiVersion {
        self.kubeadm.api_version
    }

    /// A private, mutable copy of the shared config for one host
    pub(crate) fn derive_config(&self) -> KubeadmConfig {
        (*self.kubeadm).clone()
    }

    pub(crate) fn with_kubeadm(&self, kubeadm: KubeadmConfig) -> Self {
        Self {
            kubeadm: Arc::new(kubeadm),
            ..self.clone()
        }
    }

    pub(crate) fn with_token(&self, token: Token) -> Self {
        Self {
            token: Some(token),
            ..self.clone()
        }
    }

    pub(crate) fn with_certificate_key(&self, certificate_key: &str) -> Self {
        Self {
            certificate_key: Some(certificate_key.to_string()),
            ..self.clone()
        }
    }

    pub(crate) fn with_cri(&self, cri: CriSettings) -> Self {
        Self {
            cri: Some(cri),
            ..self.clone()
        }
    }

    pub(crate) fn token(&self) -> Result<&Token> {
        self.token.as_ref().context("no bootstrap token issued yet")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_builders_leave_the_original_alone() -> Result<()> {
        let base = OperationContext::new("v1.23.0", KubeadmConfig::default());

        let mut changed = base.derive_config();
        changed.set_advertise_address("10.0.0.1");

        let next = base.with_kubeadm(changed).with_certificate_key("c0ffee").with_cri(CriSettings {
            socket: "/run/containerd/containerd.sock".to_string(),
            cgroup_driver: "systemd".to_string(),
        });

        assert!(base.kubeadm().init.local_api_endpoint.advertise_address.is_none());
        assert!(base.certificate_key.is_none());
        assert!(base.token().is_err());

        assert_eq!(next.kubeadm().init.local_api_endpoint.advertise_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(next.certificate_key.as_deref(), Some("c0ffee"));
        assert_eq!(next.kube_version, "v1.23.0");
        assert_eq!(next.api_version(), KubeadmApiVersion::V1beta3);
        Ok(())
    }

    #[test]
    fn test_topology() -> Result<()> {
        let topology = Topology {
            masters: vec![Host::new("10.0.0.1", 22), Host::new("10.0.0.2", 22)],
            nodes: vec![Host::new("10.0.0.5", 22)],
        };

        assert_eq!(topology.master0()?, &Host::new("10.0.0.1", 22));
        assert_eq!(topology.master_ips(), vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(topology.host_count(), 3);
        assert!(Topology { masters: vec![], nodes: vec![] }.master0().is_err());
        Ok(())
    }
}
