use super::{context::Topology, fanout::{self, FanOutReport}, without, Lifecycle};
use crate::{config::Role, remote::Host};
use anyhow::{Context, Result};

impl Lifecycle<'_> {
    /// Remove `deleting` from the control plane, then repoint the worker nodes' ipvs rules at
    /// the masters that are left
    pub(crate) async fn delete_masters(&self, topology: &Topology, deleting: &[Host]) -> Result<FanOutReport> {
        let remaining = Topology {
            masters: without(&topology.masters, deleting),
            nodes: topology.nodes.clone(),
        };
        let kubeadm = self.load_kubeadm_config(&self.config.cluster.kubernetes_version)?;
        let etcd_data_dir = kubeadm.etcd_data_dir();
        let api_reachable = !remaining.masters.is_empty();

        let report = self
            .step(
                "delete masters",
                fanout::best_effort("delete master", deleting, |host| {
                    self.delete_host(host, Role::Master, &etcd_data_dir, api_reachable)
                }),
            )
            .await?;

        if !remaining.masters.is_empty() && !remaining.nodes.is_empty() {
            self.sync_node_ipvs(&remaining, kubeadm.api_server_port()).await?;
        }

        Ok(report)
    }

    pub(crate) async fn delete_nodes(&self, topology: &Topology, deleting: &[Host]) -> Result<FanOutReport> {
        let kubeadm = self.load_kubeadm_config(&self.config.cluster.kubernetes_version)?;
        let etcd_data_dir = kubeadm.etcd_data_dir();
        let api_reachable = !topology.masters.is_empty();

        self.step(
            "delete nodes",
            fanout::best_effort("delete node", deleting, |host| {
                self.delete_host(host, Role::Node, &etcd_data_dir, api_reachable)
            }),
        )
        .await
    }

    async fn delete_host(&self, host: &Host, role: Role, etcd_data_dir: &str, api_reachable: bool) -> Result<()> {
        if api_reachable {
            self.remove_from_api_server(host).await?;
        }

        self.reset_host(host, role, etcd_data_dir).await?;
        self.clean_local_state(host).await
    }

    /// Delete the Node object whose InternalIP is the host's address
    async fn remove_from_api_server(&self, host: &Host) -> Result<()> {
        let nodes = self.kube_client.list_nodes().await.context("listing nodes")?;

        match nodes
            .iter()
            .find(|node| node.internal_ip.as_deref() == Some(host.ip.as_str()))
        {
            Some(node) => self
                .kube_client
                .delete_node(&node.name)
                .await
                .with_context(|| format!("deleting node {}", node.name)),
            None => {
                log::warn!("no node object has InternalIP {}, skipping API removal", host.ip);
                Ok(())
            }
        }
    }
}
