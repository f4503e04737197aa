use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// Only the fields the orchestrator reads or writes are typed. Everything else rides along in
// `extra` so user supplied settings survive a decode/render cycle untouched.

macro_rules! impl_is_empty {
    ($($t:ty),* $(,)?) => {
        $(
            impl $t {
                pub(crate) fn is_empty(&self) -> bool {
                    *self == Self::default()
                }
            }
        )*
    };
}

impl_is_empty!(
    ApiEndpoint,
    NodeRegistration,
    Networking,
    ControlPlaneComponent,
    Etcd,
    Discovery,
    Ipvs,
);

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InitConfiguration {
    #[serde(rename = "localAPIEndpoint", default, skip_serializing_if = "ApiEndpoint::is_empty")]
    pub(crate) local_api_endpoint: ApiEndpoint,
    #[serde(default, skip_serializing_if = "NodeRegistration::is_empty")]
    pub(crate) node_registration: NodeRegistration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) certificate_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) skip_phases: Vec<String>,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiEndpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) advertise_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) bind_port: Option<u16>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NodeRegistration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) cri_socket: Option<String>,
    /// `Some(vec![])` is meaningful: it tells kubeadm not to taint the node at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) taints: Option<Vec<Taint>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) kubelet_extra_args: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) ignore_preflight_errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) image_pull_policy: Option<String>,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Taint {
    pub(crate) key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) value: Option<String>,
    pub(crate) effect: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClusterConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) kubernetes_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) control_plane_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) image_repository: Option<String>,
    #[serde(default, skip_serializing_if = "Networking::is_empty")]
    pub(crate) networking: Networking,
    #[serde(default, skip_serializing_if = "ApiServer::is_empty")]
    pub(crate) api_server: ApiServer,
    #[serde(default, skip_serializing_if = "ControlPlaneComponent::is_empty")]
    pub(crate) controller_manager: ControlPlaneComponent,
    #[serde(default, skip_serializing_if = "ControlPlaneComponent::is_empty")]
    pub(crate) scheduler: ControlPlaneComponent,
    #[serde(default, skip_serializing_if = "Etcd::is_empty")]
    pub(crate) etcd: Etcd,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Networking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) pod_subnet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) service_subnet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) dns_domain: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiServer {
    #[serde(rename = "certSANs", default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) cert_sans: Vec<String>,
    #[serde(flatten)]
    pub(crate) component: ControlPlaneComponent,
}

impl ApiServer {
    pub(crate) fn is_empty(&self) -> bool {
        self.cert_sans.is_empty() && self.component.is_empty()
    }
}

/// The extraArgs/extraVolumes shape shared by the API server, controller manager and scheduler
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ControlPlaneComponent {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) extra_args: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) extra_volumes: Vec<Value>,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Etcd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) local: Option<LocalEtcd>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) external: Option<ExternalEtcd>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LocalEtcd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) extra_args: BTreeMap<String, String>,
    #[serde(rename = "serverCertSANs", default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) server_cert_sans: Vec<String>,
    #[serde(rename = "peerCertSANs", default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) peer_cert_sans: Vec<String>,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExternalEtcd {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) endpoints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) ca_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) cert_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) key_file: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JoinConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) ca_cert_path: Option<String>,
    #[serde(default, skip_serializing_if = "Discovery::is_empty")]
    pub(crate) discovery: Discovery,
    #[serde(default, skip_serializing_if = "NodeRegistration::is_empty")]
    pub(crate) node_registration: NodeRegistration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) control_plane: Option<JoinControlPlane>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) skip_phases: Vec<String>,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Discovery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) bootstrap_token: Option<BootstrapTokenDiscovery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) tls_bootstrap_token: Option<String>,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BootstrapTokenDiscovery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) api_server_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) ca_cert_hashes: Vec<String>,
    #[serde(rename = "unsafeSkipCAVerification", default, skip_serializing_if = "Option::is_none")]
    pub(crate) unsafe_skip_ca_verification: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JoinControlPlane {
    #[serde(rename = "localAPIEndpoint", default, skip_serializing_if = "ApiEndpoint::is_empty")]
    pub(crate) local_api_endpoint: ApiEndpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) certificate_key: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KubeletConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) cgroup_driver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) container_runtime_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) image_service_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) feature_gates: BTreeMap<String, bool>,
    #[serde(rename = "clusterDNS", default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) cluster_dns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) cluster_domain: Option<String>,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KubeProxyConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) mode: Option<String>,
    #[serde(rename = "clusterCIDR", default, skip_serializing_if = "Option::is_none")]
    pub(crate) cluster_cidr: Option<String>,
    #[serde(default, skip_serializing_if = "Ipvs::is_empty")]
    pub(crate) ipvs: Ipvs,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Ipvs {
    #[serde(rename = "excludeCIDRs", default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) exclude_cidrs: Vec<String>,
    #[serde(rename = "strictARP", default, skip_serializing_if = "Option::is_none")]
    pub(crate) strict_arp: Option<bool>,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}
