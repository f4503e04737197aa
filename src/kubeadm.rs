use self::{
    merge::merge_document,
    registry::TypeRegistry,
    types::{
        BootstrapTokenDiscovery, ClusterConfiguration, InitConfiguration, JoinConfiguration, JoinControlPlane,
        KubeProxyConfiguration, KubeletConfiguration, LocalEtcd,
    },
};
use crate::{
    error::LifecycleError,
    net_utils,
    template::{self, TemplateParams},
    token::Token,
    version::{self, KubeadmApiVersion},
};
use anyhow::{bail, ensure, Context, Result};
use fn_error_context::context;
use itertools::Itertools;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

pub(crate) mod conversion;
pub(crate) mod feature_gates;
pub(crate) mod merge;
pub(crate) mod registry;
pub(crate) mod types;

pub(crate) const DEFAULT_API_SERVER_PORT: u16 = 6443;
pub(crate) const DEFAULT_ETCD_DATA_DIR: &str = "/var/lib/etcd";
pub(crate) const DEFAULT_DNS_DOMAIN: &str = "cluster.local";
pub(crate) const DEFAULT_POD_SUBNET: &str = "100.64.0.0/10";
pub(crate) const DEFAULT_SERVICE_SUBNET: &str = "10.96.0.0/12";
const DEFAULT_CA_CERT_PATH: &str = "/etc/kubernetes/pki/ca.crt";
const DEFAULT_PROXY_MODE: &str = "ipvs";
const IMAGE_PULL_POLICY: &str = "IfNotPresent";

/// Path of the kubeadm defaults shipped inside a cluster image
pub(crate) const IMAGE_KUBEADM_FILE: &str = "etc/kubeadm.yml";

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
pub(crate) enum DocumentKind {
    #[strum(serialize = "InitConfiguration")]
    #[serde(rename = "InitConfiguration")]
    Init,
    #[strum(serialize = "ClusterConfiguration")]
    #[serde(rename = "ClusterConfiguration")]
    Cluster,
    #[strum(serialize = "JoinConfiguration")]
    #[serde(rename = "JoinConfiguration")]
    Join,
    #[strum(serialize = "KubeletConfiguration")]
    #[serde(rename = "KubeletConfiguration")]
    Kubelet,
    #[strum(serialize = "KubeProxyConfiguration")]
    #[serde(rename = "KubeProxyConfiguration")]
    KubeProxy,
}

impl DocumentKind {
    pub(crate) fn kind_name(self) -> &'static str {
        self.into()
    }

    pub(crate) fn group(self) -> &'static str {
        match self {
            Self::Init | Self::Cluster | Self::Join => "kubeadm.k8s.io",
            Self::Kubelet => "kubelet.config.k8s.io",
            Self::KubeProxy => "kubeproxy.config.k8s.io",
        }
    }

    /// Component config groups don't follow the kubeadm API generations
    pub(crate) fn fixed_version(self) -> Option<&'static str> {
        match self {
            Self::Init | Self::Cluster | Self::Join => None,
            Self::Kubelet => Some("v1beta1"),
            Self::KubeProxy => Some("v1alpha1"),
        }
    }

    pub(crate) fn gvk(self, api_version: KubeadmApiVersion) -> Gvk {
        Gvk {
            group: self.group(),
            version: self.fixed_version().unwrap_or_else(|| api_version.version()),
            kind: self.kind_name(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Gvk {
    pub(crate) group: &'static str,
    pub(crate) version: &'static str,
    pub(crate) kind: &'static str,
}

impl Gvk {
    pub(crate) fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }
}

impl std::fmt::Display for Gvk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// The five kubeadm documents of one operation. A single API version covers all the kubeadm.k8s.io
/// documents, so they can never be rendered with mixed versions.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct KubeadmConfig {
    pub(crate) api_version: KubeadmApiVersion,
    pub(crate) init: InitConfiguration,
    pub(crate) cluster: ClusterConfiguration,
    pub(crate) join: JoinConfiguration,
    pub(crate) kubelet: KubeletConfiguration,
    pub(crate) kube_proxy: KubeProxyConfiguration,
}

impl Default for KubeadmConfig {
    fn default() -> Self {
        Self {
            api_version: KubeadmApiVersion::V1beta3,
            init: Default::default(),
            cluster: Default::default(),
            join: Default::default(),
            kubelet: Default::default(),
            kube_proxy: Default::default(),
        }
    }
}

fn absorb<T: Serialize + DeserializeOwned>(slot: &mut T, kind: DocumentKind, document: Value) -> Result<()> {
    let decoded: T = serde_json::from_value(document).with_context(|| format!("decoding {}", kind))?;
    *slot = merge_document(slot, &decoded).with_context(|| format!("combining repeated {}", kind))?;
    Ok(())
}

impl KubeadmConfig {
    /// Built-in skeletons, then the image's own kubeadm file when it ships one, then defaulting
    pub(crate) fn load_defaults(registry: &TypeRegistry, image_rootfs: Option<&Path>, params: &TemplateParams) -> Result<Self> {
        let skeletons = DocumentKind::iter()
            .map(|kind| template::render_default(kind, params))
            .collect::<Result<Vec<_>>>()?
            .join("---\n");

        let mut config = Self::from_yaml(registry, &skeletons).context("decoding built-in defaults")?;

        if let Some(image_rootfs) = image_rootfs {
            let image_file = image_rootfs.join(IMAGE_KUBEADM_FILE);
            if image_file.exists() {
                log::info!("loading kubeadm defaults from {}", image_file.display());
                let text = std::fs::read_to_string(&image_file)
                    .map_err(|err| LifecycleError::ConfigLoad(anyhow::Error::from(err).context(image_file.display().to_string())))?;
                let image_config =
                    Self::from_yaml(registry, &text).with_context(|| format!("decoding {}", image_file.display()))?;
                config = config.merge(&image_config)?;
            } else {
                log::debug!("{} not found, using built-in kubeadm defaults only", image_file.display());
            }
        }

        config.set_defaults();
        Ok(config)
    }

    /// Decode a multi-document stream. Documents of kinds we don't know are skipped.
    pub(crate) fn from_yaml(registry: &TypeRegistry, text: &str) -> Result<Self> {
        Self::decode(registry, text).map_err(|err| LifecycleError::ConfigLoad(err).into())
    }

    fn decode(registry: &TypeRegistry, text: &str) -> Result<Self> {
        let mut config = Self::default();

        for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
            let mut document = Value::deserialize(document).with_context(|| format!("parsing document {}", index))?;

            if document.is_null() {
                continue;
            }

            let Some(fields) = document.as_object_mut() else {
                bail!("document {} is not a mapping", index);
            };

            let api_version = fields.remove("apiVersion").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
            let kind_name = fields.remove("kind").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();

            let Some(registered) = registry.resolve(&api_version, &kind_name)? else {
                log::debug!("skipping document {} of unknown kind {:?}", index, kind_name);
                continue;
            };

            if let Some(from) = registered.kubeadm_version {
                conversion::upgrade(registered.kind, from, &mut document)
                    .with_context(|| format!("converting {} from {}", kind_name, from))?;
            }

            match registered.kind {
                DocumentKind::Init => absorb(&mut config.init, registered.kind, document)?,
                DocumentKind::Cluster => absorb(&mut config.cluster, registered.kind, document)?,
                DocumentKind::Join => absorb(&mut config.join, registered.kind, document)?,
                DocumentKind::Kubelet => absorb(&mut config.kubelet, registered.kind, document)?,
                DocumentKind::KubeProxy => absorb(&mut config.kube_proxy, registered.kind, document)?,
            }
        }

        Ok(config)
    }

    /// Deep merge `overlay` onto `self`, user wins. Local and external etcd are mutually exclusive, so
    /// whichever one the overlay sets clears the other on the base before the generic merge.
    pub(crate) fn merge(mut self, overlay: &KubeadmConfig) -> Result<Self> {
        if overlay.cluster.etcd.external.is_some() {
            self.cluster.etcd.local = None;
        }
        if overlay.cluster.etcd.local.is_some() {
            self.cluster.etcd.external = None;
        }

        let merged = (|| -> Result<Self> {
            Ok(Self {
                api_version: self.api_version,
                init: merge_document(&self.init, &overlay.init).context("InitConfiguration")?,
                cluster: merge_document(&self.cluster, &overlay.cluster).context("ClusterConfiguration")?,
                join: merge_document(&self.join, &overlay.join).context("JoinConfiguration")?,
                kubelet: merge_document(&self.kubelet, &overlay.kubelet).context("KubeletConfiguration")?,
                kube_proxy: merge_document(&self.kube_proxy, &overlay.kube_proxy).context("KubeProxyConfiguration")?,
            })
        })();

        merged.map_err(|err| LifecycleError::ConfigMerge(err).into())
    }

    /// Fill whatever kubeadm itself would otherwise guess
    pub(crate) fn set_defaults(&mut self) {
        self.init.local_api_endpoint.bind_port.get_or_insert(DEFAULT_API_SERVER_PORT);

        let networking = &mut self.cluster.networking;
        let dns_domain = networking.dns_domain.get_or_insert_with(|| DEFAULT_DNS_DOMAIN.to_string()).clone();
        let pod_subnet = networking.pod_subnet.get_or_insert_with(|| DEFAULT_POD_SUBNET.to_string()).clone();
        networking.service_subnet.get_or_insert_with(|| DEFAULT_SERVICE_SUBNET.to_string());

        let etcd = &mut self.cluster.etcd;
        if etcd.local.is_none() && etcd.external.is_none() {
            etcd.local = Some(LocalEtcd::default());
        }
        if let Some(local) = &mut etcd.local {
            local.data_dir.get_or_insert_with(|| DEFAULT_ETCD_DATA_DIR.to_string());
        }

        self.join.ca_cert_path.get_or_insert_with(|| DEFAULT_CA_CERT_PATH.to_string());
        self.kubelet.cluster_domain.get_or_insert(dns_domain);
        self.kube_proxy.mode.get_or_insert_with(|| DEFAULT_PROXY_MODE.to_string());
        self.kube_proxy.cluster_cidr.get_or_insert(pod_subnet);
    }

    /// Pin the config to one kubernetes version, after all user input has been merged
    #[context("finalizing kubeadm config for {}", kube_version)]
    pub(crate) fn finalize(&mut self, kube_version: &str, vip: &str) -> Result<()> {
        self.api_version = version::resolve_api_version(kube_version)?;
        self.cluster.kubernetes_version = Some(kube_version.to_string());
        feature_gates::apply(self, kube_version);
        self.set_defaults();
        self.validate_vip(vip)
    }

    /// The VIP is routed by IPVS on every node, it must not collide with cluster addresses
    pub(crate) fn validate_vip(&self, vip: &str) -> Result<()> {
        ensure!(net_utils::is_ip(vip), "virtual IP {:?} is not an IP address", vip);

        let networking = &self.cluster.networking;
        for (name, subnet) in [("pod", &networking.pod_subnet), ("service", &networking.service_subnet)] {
            if let Some(subnet) = subnet {
                ensure!(
                    !net_utils::cidrs_contain(subnet, vip)?,
                    "virtual IP {} lies inside the {} subnet {}",
                    vip,
                    name,
                    subnet
                );
            }
        }

        Ok(())
    }

    pub(crate) fn api_server_port(&self) -> u16 {
        self.init.local_api_endpoint.bind_port.unwrap_or(DEFAULT_API_SERVER_PORT)
    }

    pub(crate) fn etcd_data_dir(&self) -> String {
        self.cluster
            .etcd
            .local
            .as_ref()
            .and_then(|local| local.data_dir.clone())
            .unwrap_or_else(|| DEFAULT_ETCD_DATA_DIR.to_string())
    }

    pub(crate) fn dns_domain(&self) -> &str {
        self.cluster.networking.dns_domain.as_deref().unwrap_or(DEFAULT_DNS_DOMAIN)
    }

    pub(crate) fn service_subnet(&self) -> &str {
        self.cluster.networking.service_subnet.as_deref().unwrap_or(DEFAULT_SERVICE_SUBNET)
    }

    pub(crate) fn set_advertise_address(&mut self, ip: &str) {
        self.init.local_api_endpoint.advertise_address = Some(ip.to_string());
    }

    pub(crate) fn set_control_plane_endpoint(&mut self, endpoint: &str) {
        self.cluster.control_plane_endpoint = Some(endpoint.to_string());
    }

    /// Loopback, API server domain, VIP and master IPs lead, user entries follow, no repeats
    pub(crate) fn set_cert_sans(&mut self, apiserver_domain: &str, vip: &str, masters: &[String]) {
        let existing = std::mem::take(&mut self.cluster.api_server.cert_sans);

        self.cluster.api_server.cert_sans = ["127.0.0.1", apiserver_domain, vip]
            .into_iter()
            .map(str::to_string)
            .chain(masters.iter().cloned())
            .chain(existing)
            .filter(|san| !san.is_empty())
            .unique()
            .collect();
    }

    pub(crate) fn add_exclude_cidr(&mut self, cidr: &str) {
        let exclude = &mut self.kube_proxy.ipvs.exclude_cidrs;
        exclude.push(cidr.to_string());
        *exclude = exclude.drain(..).unique().collect();
    }

    /// A lone master has to schedule workloads itself
    pub(crate) fn set_single_host_taints(&mut self) {
        self.init.node_registration.taints.get_or_insert_with(Vec::new);
    }

    pub(crate) fn set_cri(&mut self, cri_socket: &str, cgroup_driver: &str) {
        let endpoint = if cri_socket.starts_with("unix://") {
            cri_socket.to_string()
        } else {
            format!("unix://{}", cri_socket)
        };

        for registration in [&mut self.init.node_registration, &mut self.join.node_registration] {
            registration.cri_socket = Some(endpoint.clone());
            registration.image_pull_policy = Some(IMAGE_PULL_POLICY.to_string());
        }
        self.kubelet.container_runtime_endpoint = Some(endpoint);
        self.kubelet.cgroup_driver = Some(cgroup_driver.to_string());
    }

    pub(crate) fn set_image_service_endpoint(&mut self, endpoint: &str) {
        let endpoint = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("unix://{}", endpoint)
        };
        self.kubelet.image_service_endpoint = Some(endpoint);
    }

    pub(crate) fn set_certificate_key(&mut self, certificate_key: &str) {
        self.init.certificate_key = Some(certificate_key.to_string());
        if let Some(control_plane) = &mut self.join.control_plane {
            control_plane.certificate_key = Some(certificate_key.to_string());
        }
    }

    /// Token discovery against `api_server_endpoint` using the shared token
    pub(crate) fn set_join_token(&mut self, token: &Token, api_server_endpoint: &str) {
        self.join.discovery.bootstrap_token = Some(BootstrapTokenDiscovery {
            token: Some(token.join_token.clone()),
            api_server_endpoint: Some(api_server_endpoint.to_string()),
            ca_cert_hashes: token.discovery_token_ca_cert_hash.clone(),
            unsafe_skip_ca_verification: None,
        });
    }

    /// Turn the join document into a worker join for `ip`
    pub(crate) fn set_node_join(&mut self, ip: &str, token: &Token, vip_endpoint: &str) {
        self.join.control_plane = None;
        self.set_join_token(token, vip_endpoint);
        self.join
            .node_registration
            .kubelet_extra_args
            .insert("node-ip".to_string(), ip.to_string());
    }

    /// Turn the join document into a control plane join for `ip`
    pub(crate) fn set_master_join(&mut self, ip: &str, token: &Token, master0_endpoint: &str) {
        let mut control_plane = self.join.control_plane.take().unwrap_or_else(JoinControlPlane::default);
        control_plane.local_api_endpoint.advertise_address = Some(ip.to_string());
        control_plane.local_api_endpoint.bind_port = Some(self.api_server_port());
        control_plane.certificate_key = Some(token.certificate_key.clone()).filter(|key| !key.is_empty());
        self.join.control_plane = Some(control_plane);
        self.set_join_token(token, master0_endpoint);
    }

    /// The canonical JSON form of one document, without apiVersion/kind
    pub(crate) fn document_value(&self, kind: DocumentKind) -> Result<Value> {
        match kind {
            DocumentKind::Init => serde_json::to_value(&self.init),
            DocumentKind::Cluster => serde_json::to_value(&self.cluster),
            DocumentKind::Join => serde_json::to_value(&self.join),
            DocumentKind::Kubelet => serde_json::to_value(&self.kubelet),
            DocumentKind::KubeProxy => serde_json::to_value(&self.kube_proxy),
        }
        .with_context(|| format!("serializing {}", kind))
    }
}

#[cfg(test)]
mod tests {
    use super::{types::ExternalEtcd, *};

    fn params() -> TemplateParams {
        TemplateParams {
            kubernetes_version: "v1.23.0".to_string(),
            pod_subnet: DEFAULT_POD_SUBNET.to_string(),
            service_subnet: DEFAULT_SERVICE_SUBNET.to_string(),
            dns_domain: DEFAULT_DNS_DOMAIN.to_string(),
            apiserver_domain: "apiserver.cluster.local".to_string(),
            apiserver_port: DEFAULT_API_SERVER_PORT,
            vip: "10.103.97.2".to_string(),
            etcd_data_dir: DEFAULT_ETCD_DATA_DIR.to_string(),
        }
    }

    #[test]
    fn test_load_defaults() -> Result<()> {
        let registry = TypeRegistry::new();
        let config = KubeadmConfig::load_defaults(&registry, None, &params())?;

        assert_eq!(config.cluster.kubernetes_version.as_deref(), Some("v1.23.0"));
        assert_eq!(config.api_server_port(), 6443);
        assert_eq!(config.etcd_data_dir(), "/var/lib/etcd");
        assert_eq!(config.kube_proxy.mode.as_deref(), Some("ipvs"));
        assert_eq!(config.cluster.networking.pod_subnet.as_deref(), Some(DEFAULT_POD_SUBNET));
        assert!(config.cluster.etcd.external.is_none());
        Ok(())
    }

    #[test]
    fn test_load_defaults_from_image() -> Result<()> {
        let rootfs = tempfile::tempdir()?;
        std::fs::create_dir_all(rootfs.path().join("etc"))?;
        std::fs::write(
            rootfs.path().join(IMAGE_KUBEADM_FILE),
            r#"
apiVersion: kubeadm.k8s.io/v1beta2
kind: ClusterConfiguration
imageRepository: sealos.hub:5000
dns:
  type: CoreDNS
apiServer:
  certSANs: [sealos.hub]
---
apiVersion: apps.sealos.io/v1beta1
kind: Cluster
spec: {}
"#,
        )?;

        let registry = TypeRegistry::new();
        let config = KubeadmConfig::load_defaults(&registry, Some(rootfs.path()), &params())?;

        assert_eq!(config.cluster.image_repository.as_deref(), Some("sealos.hub:5000"));
        assert!(config.cluster.api_server.cert_sans.contains(&"sealos.hub".to_string()));
        assert!(config.cluster.extra.get("dns").and_then(|dns| dns.get("type")).is_none());
        Ok(())
    }

    #[test]
    fn test_from_yaml_bad_document_is_config_load() {
        let registry = TypeRegistry::new();
        let err = KubeadmConfig::from_yaml(
            &registry,
            "apiVersion: kubeadm.k8s.io/v1beta3\nkind: InitConfiguration\nlocalAPIEndpoint:\n  bindPort: not-a-port\n",
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<LifecycleError>(),
            Some(LifecycleError::ConfigLoad(_))
        ));
    }

    #[test]
    fn test_merge_etcd_mutual_exclusion() -> Result<()> {
        let mut base = KubeadmConfig::default();
        base.set_defaults();
        assert!(base.cluster.etcd.local.is_some());

        let mut overlay = KubeadmConfig::default();
        overlay.cluster.etcd.external = Some(ExternalEtcd {
            endpoints: vec!["https://10.0.0.9:2379".to_string()],
            ..Default::default()
        });

        let merged = base.clone().merge(&overlay)?;
        assert!(merged.cluster.etcd.local.is_none());
        assert_eq!(merged.cluster.etcd.external, overlay.cluster.etcd.external);

        let back = merged.merge(&base)?;
        assert!(back.cluster.etcd.external.is_none());
        assert!(back.cluster.etcd.local.is_some());
        Ok(())
    }

    #[test]
    fn test_merge_appends_lists() -> Result<()> {
        let mut base = KubeadmConfig::default();
        base.cluster.api_server.cert_sans = vec!["127.0.0.1".to_string(), "10.0.0.1".to_string()];
        let mut overlay = KubeadmConfig::default();
        overlay.cluster.api_server.cert_sans = vec!["10.0.0.1".to_string(), "lb.example.com".to_string()];

        let mut merged = base.clone().merge(&overlay)?;
        assert_eq!(merged.cluster.api_server.cert_sans.len(), 4);

        merged.set_cert_sans("apiserver.cluster.local", "10.103.97.2", &["10.0.0.1".to_string()]);
        assert_eq!(
            merged.cluster.api_server.cert_sans,
            vec!["127.0.0.1", "apiserver.cluster.local", "10.103.97.2", "10.0.0.1", "lb.example.com"]
        );
        Ok(())
    }

    #[test]
    fn test_finalize_validates_vip() -> Result<()> {
        let mut config = KubeadmConfig::default();
        config.set_defaults();

        assert!(config.clone().finalize("v1.23.0", "10.96.0.10").is_err());
        assert!(config.clone().finalize("v1.23.0", "100.64.0.3").is_err());
        assert!(config.clone().finalize("v1.12.0", "10.103.97.2").is_err());

        config.finalize("v1.18.3", "10.103.97.2")?;
        assert_eq!(config.api_version, KubeadmApiVersion::V1beta2);
        assert_eq!(config.cluster.kubernetes_version.as_deref(), Some("v1.18.3"));
        Ok(())
    }

    #[test]
    fn test_join_derivation() {
        let token = Token {
            join_token: "abcdef.0123456789abcdef".to_string(),
            discovery_token_ca_cert_hash: vec!["sha256:aaaa".to_string()],
            certificate_key: "c0ffee".to_string(),
            expires: None,
        };

        let mut config = KubeadmConfig::default();
        config.set_defaults();

        let mut node = config.clone();
        node.set_node_join("10.0.0.5", &token, "10.103.97.2:6443");
        assert!(node.join.control_plane.is_none());
        assert_eq!(node.join.node_registration.kubelet_extra_args["node-ip"], "10.0.0.5");
        let discovery = node.join.discovery.bootstrap_token.as_ref();
        assert_eq!(discovery.and_then(|d| d.api_server_endpoint.as_deref()), Some("10.103.97.2:6443"));

        let mut master = config;
        master.set_master_join("10.0.0.2", &token, "10.0.0.1:6443");
        let control_plane = master.join.control_plane.as_ref();
        assert_eq!(
            control_plane.and_then(|c| c.local_api_endpoint.advertise_address.as_deref()),
            Some("10.0.0.2")
        );
        assert_eq!(control_plane.and_then(|c| c.certificate_key.as_deref()), Some("c0ffee"));
        assert_eq!(
            master.join.discovery.bootstrap_token.map(|d| d.ca_cert_hashes),
            Some(vec!["sha256:aaaa".to_string()])
        );
    }

    #[test]
    fn test_set_cri_and_exclude_cidr() {
        let mut config = KubeadmConfig::default();
        config.set_cri("/run/containerd/containerd.sock", "systemd");
        config.add_exclude_cidr("10.103.97.2/32");
        config.add_exclude_cidr("10.103.97.2/32");

        assert_eq!(
            config.init.node_registration.cri_socket.as_deref(),
            Some("unix:///run/containerd/containerd.sock")
        );
        assert_eq!(config.join.node_registration.cri_socket, config.init.node_registration.cri_socket);
        assert_eq!(config.kubelet.container_runtime_endpoint, config.init.node_registration.cri_socket);
        assert_eq!(config.kubelet.cgroup_driver.as_deref(), Some("systemd"));
        assert_eq!(config.kube_proxy.ipvs.exclude_cidrs, vec!["10.103.97.2/32"]);
    }
}
