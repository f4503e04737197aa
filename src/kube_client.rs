use crate::remote::{Host, RemoteExecutor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct NodeRef {
    pub(crate) name: String,
    pub(crate) internal_ip: Option<String>,
}

#[async_trait]
pub(crate) trait KubernetesClient: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeRef>>;

    async fn delete_node(&self, name: &str) -> Result<()>;

    /// The ClusterConfiguration document stored in kube-system/kubeadm-config
    async fn kubeadm_cluster_configuration(&self) -> Result<String>;
}

#[derive(Deserialize)]
struct NodeList {
    items: Vec<Node>,
}

#[derive(Deserialize)]
struct Node {
    metadata: NodeMetadata,
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Deserialize)]
struct NodeMetadata {
    name: String,
}

#[derive(Default, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    addresses: Vec<NodeAddress>,
}

#[derive(Deserialize)]
struct NodeAddress {
    #[serde(rename = "type")]
    address_type: String,
    address: String,
}

/// Talks to the API server by running kubectl on a master over the executor
pub(crate) struct KubectlClient {
    executor: Arc<dyn RemoteExecutor>,
    master: Host,
}

impl KubectlClient {
    pub(crate) fn new(executor: Arc<dyn RemoteExecutor>, master: Host) -> Self {
        Self { executor, master }
    }

    async fn kubectl(&self, args: &str) -> Result<String> {
        self.executor
            .run_and_capture(&self.master, &format!("kubectl {}", args))
            .await
            .with_context(|| format!("kubectl {} on {}", args, self.master))
    }
}

fn parse_node_list(json: &str) -> Result<Vec<NodeRef>> {
    let list: NodeList = serde_json::from_str(json).context("parsing node list")?;

    Ok(list
        .items
        .into_iter()
        .map(|node| NodeRef {
            internal_ip: node
                .status
                .addresses
                .into_iter()
                .find(|address| address.address_type == "InternalIP")
                .map(|address| address.address),
            name: node.metadata.name,
        })
        .collect())
}

#[async_trait]
impl KubernetesClient for KubectlClient {
    async fn list_nodes(&self) -> Result<Vec<NodeRef>> {
        parse_node_list(&self.kubectl("get nodes -o json").await?)
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        self.kubectl(&format!("delete node {} --ignore-not-found", name)).await?;
        Ok(())
    }

    async fn kubeadm_cluster_configuration(&self) -> Result<String> {
        self.kubectl("-n kube-system get configmap kubeadm-config -o jsonpath={.data.ClusterConfiguration}")
            .await
    }
}
