use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as base64_standard, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub(crate) const CLUSTER_NAME: &str = "kubernetes";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Kubeconfig {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub(crate) api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) kind: Option<String>,
    #[serde(default)]
    pub(crate) clusters: Vec<NamedCluster>,
    #[serde(default)]
    pub(crate) contexts: Vec<NamedContext>,
    #[serde(default)]
    pub(crate) current_context: String,
    #[serde(default)]
    pub(crate) users: Vec<NamedUser>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct NamedCluster {
    pub(crate) name: String,
    pub(crate) cluster: Cluster,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Cluster {
    #[serde(default)]
    pub(crate) server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) certificate_authority_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) certificate_authority: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct NamedContext {
    pub(crate) name: String,
    pub(crate) context: KubeContext,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct KubeContext {
    pub(crate) cluster: String,
    pub(crate) user: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct NamedUser {
    pub(crate) name: String,
    pub(crate) user: User,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) client_certificate_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) client_key_data: Option<String>,
}

impl Kubeconfig {
    /// A single cluster, single user kubeconfig with everything inlined
    pub(crate) fn new(server: &str, ca_pem: &str, user: &str, cert_pem: &str, key_pem: &str) -> Self {
        let context = format!("{}@{}", user, CLUSTER_NAME);

        Self {
            api_version: Some("v1".to_string()),
            kind: Some("Config".to_string()),
            clusters: vec![NamedCluster {
                name: CLUSTER_NAME.to_string(),
                cluster: Cluster {
                    server: server.to_string(),
                    certificate_authority_data: Some(base64_standard.encode(ca_pem)),
                    certificate_authority: None,
                },
            }],
            contexts: vec![NamedContext {
                name: context.clone(),
                context: KubeContext {
                    cluster: CLUSTER_NAME.to_string(),
                    user: user.to_string(),
                },
            }],
            current_context: context,
            users: vec![NamedUser {
                name: user.to_string(),
                user: User {
                    client_certificate_data: Some(base64_standard.encode(cert_pem)),
                    client_key_data: Some(base64_standard.encode(key_pem)),
                },
            }],
        }
    }

    pub(crate) fn load(path: &Path) -> Result<Self> {
        serde_yaml::from_str(&std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?)
            .with_context(|| format!("parsing kubeconfig {}", path.display()))
    }

    /// The cluster the current context points at, or the only cluster when there is no context
    pub(crate) fn current_cluster(&self) -> Result<&Cluster> {
        let cluster_name = match self.contexts.iter().find(|context| context.name == self.current_context) {
            Some(context) => context.context.cluster.as_str(),
            None if self.clusters.len() == 1 => self.clusters[0].name.as_str(),
            None => anyhow::bail!("current context {:?} not found", self.current_context),
        };

        self.clusters
            .iter()
            .find(|cluster| cluster.name == cluster_name)
            .map(|cluster| &cluster.cluster)
            .with_context(|| format!("cluster {:?} not found", cluster_name))
    }

    /// The PEM bytes of the CA bundle, inline or from the referenced file
    pub(crate) fn ca_bundle(&self, kubeconfig_dir: &Path) -> Result<Vec<u8>> {
        let cluster = self.current_cluster()?;

        if let Some(data) = &cluster.certificate_authority_data {
            return base64_standard.decode(data.trim()).context("decoding certificate-authority-data");
        }

        let ca_file = cluster
            .certificate_authority
            .as_ref()
            .context("cluster has neither certificate-authority-data nor certificate-authority")?;

        let mut ca_path = PathBuf::from(ca_file);
        if ca_path.is_relative() {
            ca_path = kubeconfig_dir.join(ca_path);
        }

        std::fs::read(&ca_path).with_context(|| format!("reading {}", ca_path.display()))
    }
}
