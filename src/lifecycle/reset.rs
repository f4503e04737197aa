use super::{context::Topology, fanout::{self, FanOutReport}, Lifecycle, LVSCARE_DOMAIN};
use crate::{
    config::Role,
    file_utils,
    remote::{self, Host},
};
use anyhow::{Context, Result};
use futures_util::future::join_all;

const FLUSH_IPVS_CMD: &str = "(command -v ipvsadm >/dev/null && ipvsadm -C) || true";

impl Lifecycle<'_> {
    /// Tear down every host: nodes in parallel, then masters one at a time. Individual failures
    /// are collected instead of stopping the teardown.
    pub(crate) async fn reset(&self, topology: &Topology) -> Result<FanOutReport> {
        let kubeadm = self.load_kubeadm_config(&self.config.cluster.kubernetes_version)?;
        let etcd_data_dir = kubeadm.etcd_data_dir();
        let etcd_data_dir = etcd_data_dir.as_str();

        self.step("delete registry entries", self.delete_registry(topology)).await?;

        let mut outcomes = self
            .step("reset nodes", async {
                Ok(join_all(topology.nodes.iter().map(|node| async move {
                    (node.clone(), self.reset_and_clean(node, Role::Node, etcd_data_dir).await)
                }))
                .await)
            })
            .await?;

        for master in &topology.masters {
            let outcome = self
                .step(
                    &format!("reset master {}", master),
                    self.reset_and_clean(master, Role::Master, etcd_data_dir),
                )
                .await;
            outcomes.push((master.clone(), outcome));
        }

        FanOutReport::collect("reset", outcomes)
    }

    async fn delete_registry(&self, topology: &Topology) -> Result<()> {
        let Some(registry) = &self.config.registry else {
            return Ok(());
        };

        let hosts = topology.masters.iter().chain(&topology.nodes).cloned().collect::<Vec<_>>();
        let cmd = remote::remove_hosts_entry_cmd(&registry.domain);

        if let Err(err) = fanout::best_effort("delete registry entry on", &hosts, |host| {
            self.executor.run_sync(host, std::slice::from_ref(&cmd))
        })
        .await
        {
            log::warn!("registry entry cleanup failed: {:#}", err);
        }

        Ok(())
    }

    async fn reset_and_clean(&self, host: &Host, role: Role, etcd_data_dir: &str) -> Result<()> {
        self.reset_host(host, role, etcd_data_dir).await?;
        self.clean_local_state(host).await
    }

    /// `kubeadm reset` plus the state it leaves behind
    pub(super) async fn reset_host(&self, host: &Host, role: Role, etcd_data_dir: &str) -> Result<()> {
        let mut removed = vec![
            "/etc/kubernetes".to_string(),
            "$HOME/.kube".to_string(),
            "/etc/cni/net.d".to_string(),
            self.config.remote_etc.clone(),
        ];
        if role == Role::Master {
            removed.push(etcd_data_dir.to_string());
        }

        let cmds = vec![
            "kubeadm reset -f".to_string(),
            format!("rm -rf {}", removed.join(" ")),
            FLUSH_IPVS_CMD.to_string(),
            remote::remove_hosts_entry_cmd(&self.config.cluster.apiserver_domain),
            remote::remove_hosts_entry_cmd(LVSCARE_DOMAIN),
        ];

        self.executor
            .run_sync(host, &cmds)
            .await
            .with_context(|| format!("resetting {}", host))
    }

    /// Drop the host's staged configs and certificates
    pub(super) async fn clean_local_state(&self, host: &Host) -> Result<()> {
        file_utils::remove_dir_if_exists(&self.host_dir(host)).await
    }
}
