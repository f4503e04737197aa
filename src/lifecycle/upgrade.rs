use super::{context::Topology, ensure_newer, Lifecycle, UPGRADE_CONFIG_FILE};
use crate::{
    kubeadm::{DocumentKind, KubeadmConfig},
    logging,
    remote::{self, Host},
    version::{self, V1_20_0, V1_27_0},
};
use anyhow::{Context, Result};

const KUBELET_DROPIN_FILES: [&str; 3] = [
    "/usr/lib/systemd/system/kubelet.service.d/10-kubeadm.conf",
    "/etc/systemd/system/kubelet.service.d/10-kubeadm.conf",
    "/var/lib/kubelet/kubeadm-flags.env",
];

const RESTART_KUBELET_CMDS: [&str; 2] = ["systemctl daemon-reload", "systemctl restart kubelet"];

impl Lifecycle<'_> {
    /// Move the cluster to `target`: master0 first with `upgrade apply`, then every other host in
    /// turn with `upgrade node`, drained while its kubelet is swapped
    pub(crate) async fn upgrade(&self, topology: &Topology, target: &str) -> Result<()> {
        let master0 = topology.master0()?;
        let current = &self.config.cluster.kubernetes_version;

        ensure_newer(current, target)?;
        let api_version = version::resolve_api_version(target)?;
        log::info!("upgrading from {} to {} with kubeadm API {}", current, target, api_version);

        self.step("wait for the API server", self.wait_api_server()).await?;

        let kubeadm = self
            .step("load upgrade config", self.upgrade_config(target))
            .await?;

        let remote_config = self.config.remote_etc_file(UPGRADE_CONFIG_FILE);
        self.step(&format!("upgrade {}", master0), async {
            let rendered = self.render(&kubeadm, &[DocumentKind::Cluster, DocumentKind::Kubelet])?;

            let mut cmds = vec![
                remote::mkdir_cmd(&self.config.remote_etc),
                remote::write_file_cmd(&remote_config, &rendered),
                self.install_binary_cmd("kubeadm"),
                format!(
                    "kubeadm upgrade apply --config={} --yes -v {}",
                    remote_config,
                    logging::kubeadm_verbosity()
                ),
            ];
            cmds.extend(self.swap_kubelet_cmds(target));

            self.executor.run_sync(master0, &cmds).await
        })
        .await?;

        for host in topology.masters[1..].iter().chain(&topology.nodes) {
            self.step(&format!("upgrade {}", host), self.upgrade_host(master0, host, target))
                .await?;
        }

        Ok(())
    }

    /// The running ClusterConfiguration, pinned to `target`
    async fn upgrade_config(&self, target: &str) -> Result<KubeadmConfig> {
        let mut kubeadm = self.load_kubeadm_config(target)?;

        let live_text = self
            .kube_client
            .kubeadm_cluster_configuration()
            .await
            .context("reading the live ClusterConfiguration")?;

        if live_text.trim().is_empty() {
            log::warn!("kube-system/kubeadm-config has no ClusterConfiguration, upgrading with local defaults");
        } else {
            let live = KubeadmConfig::from_yaml(self.registry, &live_text).context("decoding the live ClusterConfiguration")?;
            kubeadm.cluster = live.cluster;
        }

        kubeadm.finalize(target, &self.config.cluster.vip)?;
        Ok(kubeadm)
    }

    async fn upgrade_host(&self, master0: &Host, host: &Host, target: &str) -> Result<()> {
        self.wait_api_server().await?;

        let node_name = self.node_name(host).await?;

        self.executor
            .run_sync(
                host,
                &[
                    self.install_binary_cmd("kubeadm"),
                    format!("kubeadm upgrade node -v {}", logging::kubeadm_verbosity()),
                ],
            )
            .await?;

        self.executor
            .run_sync(master0, &[format!("kubectl cordon {}", node_name), drain_cmd(&node_name, target)])
            .await
            .with_context(|| format!("draining {}", node_name))?;

        self.executor.run_sync(host, &self.swap_kubelet_cmds(target)).await?;

        self.uncordon(master0, &node_name).await
    }

    /// The API server may still be restarting after kubelet comes back, keep trying until
    /// `uncordon_timeout_seconds` run out
    async fn uncordon(&self, master0: &Host, node_name: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.config.uncordon_timeout();
        let cmd = [format!("kubectl uncordon {}", node_name)];

        loop {
            match self.executor.run_sync(master0, &cmd).await {
                Ok(()) => return Ok(()),
                Err(err) if tokio::time::Instant::now() >= deadline => {
                    return Err(err).with_context(|| {
                        format!(
                            "uncordon {} did not succeed within {}s",
                            node_name, self.config.uncordon_timeout_seconds
                        )
                    });
                }
                Err(err) => {
                    log::warn!("uncordon {} failed ({:#}), retrying", node_name, err);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    fn install_binary_cmd(&self, binary: &str) -> String {
        format!("cp -f {} /usr/bin/{}", self.config.remote_bin(binary), binary)
    }

    fn swap_kubelet_cmds(&self, target: &str) -> Vec<String> {
        let mut cmds = vec![self.install_binary_cmd("kubelet"), self.install_binary_cmd("kubectl")];
        if version::compare(target, V1_27_0) {
            cmds.extend(strip_deprecated_kubelet_flags_cmds());
        }
        cmds.extend(RESTART_KUBELET_CMDS.iter().map(|cmd| cmd.to_string()));
        cmds
    }
}

fn drain_cmd(node_name: &str, target: &str) -> String {
    let empty_dir_flag = if version::compare(target, V1_20_0) {
        "--delete-emptydir-data"
    } else {
        "--delete-local-data"
    };

    format!("kubectl drain {} --ignore-daemonsets {} --force", node_name, empty_dir_flag)
}

/// kubelet 1.27 refuses to start with flags removed upstream
fn strip_deprecated_kubelet_flags_cmds() -> Vec<String> {
    KUBELET_DROPIN_FILES
        .iter()
        .map(|file| {
            format!(
                "[ -f {file} ] && sed -i -e 's/ *--container-runtime=remote//g' -e 's/ *--pod-infra-container-image=[^ \"]*//g' {file} || true",
                file = file
            )
        })
        .collect()
}
