use self::{
    context::{CriSettings, OperationContext, Topology},
    timing::{StepTiming, StepTimings},
};
use crate::{
    cli::Command,
    config::{LifecycleConfig, Role},
    error::PartialFailureError,
    file_utils,
    kube_client::{KubectlClient, KubernetesClient},
    kubeadm::{self, registry::TypeRegistry, DocumentKind, KubeadmConfig},
    logging,
    pki::{self, CertAuthority, CertCoordinator, RcgenCertAuthority},
    remote::{
        self,
        ssh::{SshExecutor, SshSettings},
        Host, RemoteExecutor,
    },
    template::{self, TemplateParams},
    token::{self, Token, TokenCoordinator},
    version::{self, CommandArgs, CommandKind},
};
use anyhow::{bail, ensure, Context, Result};
use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tempfile::TempDir;

pub(crate) mod context;
mod delete;
pub(crate) mod fanout;
mod init;
mod ipvs;
mod join;
mod reset;
pub(crate) mod timing;
mod upgrade;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const SSH_READY_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) const KUBERNETES_DIR: &str = "/etc/kubernetes";
pub(crate) const REMOTE_PKI_DIR: &str = "/etc/kubernetes/pki";
const KUBELET_AUTH_FILE: &str = "/var/lib/kubelet/config.json";
const LVSCARE_DOMAIN: &str = "lvscare.node.ip";

const INIT_CONFIG_FILE: &str = "init-kubeadm.yaml";
const JOIN_MASTER_CONFIG_FILE: &str = "join-master-kubeadm.yaml";
const JOIN_NODE_CONFIG_FILE: &str = "join-node-kubeadm.yaml";
const UPDATE_CONFIG_FILE: &str = "update-kubeadm.yaml";
const UPGRADE_CONFIG_FILE: &str = "upgrade-kubeadm.yaml";

const DEFAULT_CRI_SOCKET: &str = "/run/containerd/containerd.sock";
const DEFAULT_CGROUP_DRIVER: &str = "systemd";

const DETECT_CRI_SOCKET_CMD: &str = "for sock in /run/containerd/containerd.sock /var/run/crio/crio.sock /var/run/cri-dockerd.sock; do if [ -S \"$sock\" ]; then echo \"$sock\"; break; fi; done";
const DETECT_CGROUP_DRIVER_CMD: &str = "if [ \"$(stat -fc %T /sys/fs/cgroup/)\" = \"cgroup2fs\" ] || [ -d /run/systemd/system ]; then echo systemd; else echo cgroupfs; fi";

/// The remote, kubernetes and certificate backends a lifecycle call works through
pub(crate) struct Collaborators {
    pub(crate) executor: Arc<dyn RemoteExecutor>,
    pub(crate) kube_client: Arc<dyn KubernetesClient>,
    pub(crate) cert_authority: Arc<dyn CertAuthority>,
}

impl Collaborators {
    /// ssh/scp for remote commands, kubectl on `control_master` for the API
    pub(crate) fn over_ssh(config: &LifecycleConfig, control_master: Host) -> Self {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(SshExecutor::new(SshSettings {
            user: config.ssh.user.clone(),
            identity_file: config.ssh.identity_file.clone(),
            connect_timeout_seconds: config.ssh.connect_timeout_seconds,
            ssh_binary: config.ssh.ssh_binary.clone(),
            scp_binary: config.ssh.scp_binary.clone(),
        }));

        Self {
            kube_client: Arc::new(KubectlClient::new(Arc::clone(&executor), control_master)),
            executor,
            cert_authority: Arc::new(RcgenCertAuthority::new(
                config.cert_authority_validity_years,
                config.cert_validity_years,
            )),
        }
    }
}

/// One lifecycle call: the config it runs with, its collaborators, and the local staging
/// directories. Tokens and certificates are coordinated per call, never shared across calls.
pub(crate) struct Lifecycle<'a> {
    config: &'a LifecycleConfig,
    registry: &'a TypeRegistry,
    executor: Arc<dyn RemoteExecutor>,
    kube_client: Arc<dyn KubernetesClient>,
    cert_authority: Arc<dyn CertAuthority>,
    etc_dir: PathBuf,
    tmp_dir: TempDir,
    tokens: TokenCoordinator,
    certs: CertCoordinator,
    timings: StepTimings,
    poll_interval: Duration,
    ssh_ready_interval: Duration,
}

impl<'a> Lifecycle<'a> {
    pub(crate) fn new(config: &'a LifecycleConfig, registry: &'a TypeRegistry, collaborators: Collaborators) -> Result<Self> {
        let etc_dir = config.work_dir.join("kubeadm-lifecycle").join("etc");
        std::fs::create_dir_all(&etc_dir).with_context(|| format!("creating {}", etc_dir.display()))?;

        let tmp_dir = tempfile::Builder::new()
            .prefix("kubeadm-lifecycle-")
            .tempdir_in(&config.work_dir)
            .with_context(|| format!("creating a temp dir in {}", config.work_dir.display()))?;

        Ok(Self {
            config,
            registry,
            executor: collaborators.executor,
            kube_client: collaborators.kube_client,
            cert_authority: collaborators.cert_authority,
            etc_dir,
            tmp_dir,
            tokens: TokenCoordinator::new(&config.token_helper),
            certs: CertCoordinator::new(),
            timings: StepTimings::default(),
            poll_interval: POLL_INTERVAL,
            ssh_ready_interval: SSH_READY_INTERVAL,
        })
    }

    /// Connect over SSH, pointing kubectl at a master that survives `command`
    pub(crate) fn connect(config: &'a LifecycleConfig, registry: &'a TypeRegistry, command: &Command) -> Result<Self> {
        let masters = config.masters();

        let control_master = match command {
            Command::DeleteMasters { hosts } => masters.iter().find(|master| !hosts.contains(&master.ip)),
            _ => None,
        }
        .or_else(|| masters.first())
        .cloned()
        .context("cluster has no masters")?;

        Self::new(config, registry, Collaborators::over_ssh(config, control_master))
    }

    #[cfg(test)]
    pub(crate) fn with_intervals(mut self, poll_interval: Duration, ssh_ready_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.ssh_ready_interval = ssh_ready_interval;
        self
    }

    #[cfg(test)]
    pub(crate) fn etc_dir(&self) -> &Path {
        &self.etc_dir
    }

    pub(crate) fn timings(&self) -> Vec<StepTiming> {
        self.timings.snapshot()
    }

    pub(crate) fn topology(&self) -> Topology {
        Topology {
            masters: self.config.masters(),
            nodes: self.config.nodes(),
        }
    }

    /// Run one subcommand. Best-effort commands hand back the hosts that failed when at least one
    /// host made it.
    pub(crate) async fn execute(&self, command: &Command) -> Result<Option<PartialFailureError>> {
        let topology = self.topology();

        match command {
            Command::Init => {
                self.init(&topology).await.context("init")?;

                if topology.masters.len() > 1 {
                    self.join_masters(&topology, &topology.masters[1..])
                        .await
                        .context("join masters")?;
                }

                if !topology.nodes.is_empty() {
                    self.join_nodes(&topology, &topology.nodes).await.context("join nodes")?;
                }
            }
            Command::JoinMasters { hosts } => {
                let joining = self.select(hosts, Role::Master)?;
                ensure!(
                    !joining.contains(topology.master0()?),
                    "master0 {} is set up by init and cannot be joined",
                    topology.master0()?
                );
                self.join_masters(&topology, &joining).await.context("join masters")?;
            }
            Command::JoinNodes { hosts } => {
                let joining = self.select(hosts, Role::Node)?;
                self.join_nodes(&topology, &joining).await.context("join nodes")?;
            }
            Command::DeleteMasters { hosts } => {
                let deleting = self.select(hosts, Role::Master)?;
                if deleting.len() < topology.masters.len() {
                    ensure!(
                        !deleting.contains(topology.master0()?),
                        "master0 {} can only be deleted together with every other master",
                        topology.master0()?
                    );
                }
                return Ok(self
                    .delete_masters(&topology, &deleting)
                    .await
                    .context("delete masters")?
                    .into_failed("delete masters"));
            }
            Command::DeleteNodes { hosts } => {
                let deleting = self.select(hosts, Role::Node)?;
                return Ok(self
                    .delete_nodes(&topology, &deleting)
                    .await
                    .context("delete nodes")?
                    .into_failed("delete nodes"));
            }
            Command::Reset => {
                return Ok(self.reset(&topology).await.context("reset")?.into_failed("reset"));
            }
            Command::Upgrade { version } => {
                self.upgrade(&topology, version).await.context("upgrade")?;
            }
            Command::SyncIpvs => {
                let kubeadm = self.load_kubeadm_config(&self.config.cluster.kubernetes_version)?;
                self.sync_node_ipvs(&topology, kubeadm.api_server_port())
                    .await
                    .context("sync ipvs")?;
            }
        }

        Ok(None)
    }

    /// Map the IPs named on the command line to declared hosts of `role`
    fn select(&self, ips: &[String], role: Role) -> Result<Vec<Host>> {
        let declared = match role {
            Role::Master => self.config.masters(),
            Role::Node => self.config.nodes(),
        };

        ips.iter()
            .map(|ip| {
                declared
                    .iter()
                    .find(|host| &host.ip == ip)
                    .cloned()
                    .with_context(|| format!("{} is not declared as a {:?} in the cluster hosts", ip, role))
            })
            .collect()
    }

    /// Time and log one pipeline step, wrapping its error with the step name
    async fn step<T>(&self, name: &str, step: impl Future<Output = Result<T>>) -> Result<T> {
        log::info!("{}", name);
        let start = std::time::Instant::now();
        let result = step.await.with_context(|| format!("{} failed", name));
        self.timings.record(name, start);
        result
    }

    fn template_params(&self, kube_version: &str) -> TemplateParams {
        let cluster = &self.config.cluster;

        TemplateParams {
            kubernetes_version: kube_version.to_string(),
            pod_subnet: cluster.pod_subnet.clone().unwrap_or_else(|| kubeadm::DEFAULT_POD_SUBNET.to_string()),
            service_subnet: cluster
                .service_subnet
                .clone()
                .unwrap_or_else(|| kubeadm::DEFAULT_SERVICE_SUBNET.to_string()),
            dns_domain: cluster.dns_domain.clone(),
            apiserver_domain: cluster.apiserver_domain.clone(),
            apiserver_port: kubeadm::DEFAULT_API_SERVER_PORT,
            vip: cluster.vip.clone(),
            etcd_data_dir: kubeadm::DEFAULT_ETCD_DATA_DIR.to_string(),
        }
    }

    /// Built-in defaults, the image's kubeadm file, the user's kubeadm config, then the subnets
    /// from the cluster spec, finalized for `kube_version`
    pub(crate) fn load_kubeadm_config(&self, kube_version: &str) -> Result<KubeadmConfig> {
        let params = self.template_params(kube_version);

        let mut kubeadm = KubeadmConfig::load_defaults(self.registry, self.config.image_rootfs.as_deref(), &params)?;

        if let Some(text) = &self.config.kubeadm_config_raw {
            let overlay = KubeadmConfig::from_yaml(self.registry, text).context("decoding kubeadm_config")?;
            kubeadm = kubeadm.merge(&overlay)?;
        }

        if let Some(pod_subnet) = &self.config.cluster.pod_subnet {
            kubeadm.cluster.networking.pod_subnet = Some(pod_subnet.clone());
            kubeadm.kube_proxy.cluster_cidr = Some(pod_subnet.clone());
        }
        if let Some(service_subnet) = &self.config.cluster.service_subnet {
            kubeadm.cluster.networking.service_subnet = Some(service_subnet.clone());
        }

        kubeadm.finalize(kube_version, &self.config.cluster.vip)?;
        Ok(kubeadm)
    }

    /// Master IPs followed by the extra SANs from the cluster spec
    fn cert_san_hosts(&self, topology: &Topology) -> Vec<String> {
        topology
            .master_ips()
            .into_iter()
            .chain(self.config.cluster.cert_sans.iter().cloned())
            .collect()
    }

    fn apiserver_endpoint(&self, port: u16) -> String {
        format!("{}:{}", self.config.cluster.apiserver_domain, port)
    }

    fn vip_endpoint(&self, port: u16) -> String {
        format!("{}:{}", self.config.cluster.vip, port)
    }

    fn host_dir(&self, host: &Host) -> PathBuf {
        self.etc_dir.join("hosts").join(&host.ip)
    }

    fn render(&self, kubeadm: &KubeadmConfig, kinds: &[DocumentKind]) -> Result<String> {
        template::render_documents(kubeadm, kinds, &self.config.patches)
    }

    fn kubeadm_command(&self, ctx: &OperationContext, kind: CommandKind, config_path: &str, port: u16, master0: &Host) -> Result<String> {
        version::resolve_command(
            &ctx.kube_version,
            kind,
            &CommandArgs {
                config_path,
                master0_endpoint: &format!("{}:{}", master0.ip, port),
                vip_endpoint: &self.vip_endpoint(port),
                token: ctx.token.as_ref(),
                verbosity: logging::kubeadm_verbosity(),
            },
        )
    }

    async fn detect_cri(&self, host: &Host) -> Result<CriSettings> {
        let socket = self
            .executor
            .run_and_capture(host, DETECT_CRI_SOCKET_CMD)
            .await
            .context("detecting the CRI socket")?;

        let cgroup_driver = self
            .executor
            .run_and_capture(host, DETECT_CGROUP_DRIVER_CMD)
            .await
            .context("detecting the cgroup driver")?;

        let cri = CriSettings {
            socket: Some(socket.trim().to_string())
                .filter(|socket| !socket.is_empty())
                .unwrap_or_else(|| DEFAULT_CRI_SOCKET.to_string()),
            cgroup_driver: match cgroup_driver.trim() {
                "systemd" | "cgroupfs" => cgroup_driver.trim().to_string(),
                _ => DEFAULT_CGROUP_DRIVER.to_string(),
            },
        };

        log::debug!("{} runs {} with the {} cgroup driver", host, cri.socket, cri.cgroup_driver);
        Ok(cri)
    }

    /// The node name kubelet registers with
    async fn node_name(&self, host: &Host) -> Result<String> {
        let hostname = self.executor.run_and_capture(host, "hostname").await?;
        let hostname = hostname.trim().to_lowercase();
        ensure!(!hostname.is_empty(), "{} reported an empty hostname", host);
        Ok(hostname)
    }

    fn apply_cri(&self, kubeadm: &mut KubeadmConfig, cri: &CriSettings) {
        kubeadm.set_cri(&cri.socket, &cri.cgroup_driver);
        if let Some(image_endpoint) = &self.config.cluster.image_endpoint {
            kubeadm.set_image_service_endpoint(image_endpoint);
        }
    }

    /// Write a generated file under the staging etc dir and copy it to `remote_path` on `host`
    async fn stage_and_copy(&self, host: &Host, local_path: &Path, contents: &str, remote_path: &str) -> Result<()> {
        file_utils::write_generated(local_path, contents).await?;
        self.executor.copy_file(host, local_path, remote_path).await
    }

    async fn registry_auth(&self, host: &Host) -> Result<()> {
        let Some(registry) = &self.config.registry else {
            return Ok(());
        };

        self.executor
            .run_sync(host, &[remote::append_hosts_entry_cmd(&registry.ip, &registry.domain)])
            .await
            .context("adding the registry hosts entry")?;

        if let Some(auth) = registry.auth() {
            let docker_config = serde_json::json!({ "auths": { registry.domain.as_str(): { "auth": auth } } });
            let local_path = self.tmp_dir.path().join(&host.ip).join("config.json");
            file_utils::write_generated(&local_path, &serde_json::to_string_pretty(&docker_config)?).await?;
            self.executor
                .copy_file(host, &local_path, KUBELET_AUTH_FILE)
                .await
                .context("copying registry credentials")?;
        }

        Ok(())
    }

    async fn copy_static_files(&self, hosts: &[Host]) -> Result<()> {
        fanout::fail_fast("copy static files to", hosts, |host| async move {
            for static_file in &self.config.static_files {
                self.executor
                    .copy_file(host, &static_file.source, &static_file.destination)
                    .await
                    .with_context(|| format!("copying {}", static_file.source))?;
            }
            Ok(())
        })
        .await?;

        Ok(())
    }

    /// Staged kubeconfigs and PKI to the same places under /etc/kubernetes on `host`
    async fn copy_kubeconfigs(&self, host: &Host) -> Result<()> {
        for kubeconfig in [pki::ADMIN_KUBECONFIG, pki::CONTROLLER_MANAGER_KUBECONFIG, pki::SCHEDULER_KUBECONFIG] {
            let local_path = self.etc_dir.join(kubeconfig);
            ensure!(
                local_path.exists(),
                "{} has not been generated, init must run from this work_dir first",
                local_path.display()
            );
            self.executor
                .copy_file(host, &local_path, &format!("{}/{}", KUBERNETES_DIR, kubeconfig))
                .await?;
        }
        Ok(())
    }

    async fn copy_admin_kubeconfig(&self, host: &Host) -> Result<()> {
        self.executor
            .run_sync(
                host,
                &[
                    remote::mkdir_cmd("$HOME/.kube"),
                    format!("cp -f {}/{} $HOME/.kube/config", KUBERNETES_DIR, pki::ADMIN_KUBECONFIG),
                ],
            )
            .await
    }

    async fn wait_ssh_ready(&self, hosts: &[Host]) -> Result<()> {
        remote::wait_ssh_ready(&*self.executor, hosts, self.config.ssh_ready_attempts, self.ssh_ready_interval).await
    }

    /// Poll ListNodes until the API server answers or `api_server_wait_seconds` run out
    async fn wait_api_server(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.config.api_server_wait();

        loop {
            match self.kube_client.list_nodes().await {
                Ok(_) => return Ok(()),
                Err(err) if tokio::time::Instant::now() >= deadline => {
                    return Err(err).with_context(|| {
                        format!("API server did not answer within {}s", self.config.api_server_wait_seconds)
                    });
                }
                Err(err) => {
                    log::debug!("API server not ready yet ({:#}), retrying", err);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// One token per call, issued on master0 with the call's certificate key
    async fn issue_token(&self, ctx: &OperationContext, master0: &Host) -> Result<Token> {
        let certificate_key = ctx.certificate_key.clone().unwrap_or_else(token::create_certificate_key);
        let admin_kubeconfig = self.etc_dir.join(pki::ADMIN_KUBECONFIG);

        self.tokens
            .issue_token(
                &*self.executor,
                master0,
                &self.config.remote_etc_file(INIT_CONFIG_FILE),
                &certificate_key,
                Some(admin_kubeconfig.as_path()).filter(|path| path.exists()),
            )
            .await
    }
}

/// The nodes of a cluster after some of its hosts are gone
fn without(hosts: &[Host], removed: &[Host]) -> Vec<Host> {
    hosts.iter().filter(|host| !removed.contains(host)).cloned().collect()
}

fn ensure_newer(current: &str, target: &str) -> Result<()> {
    if version::compare(current, target) {
        bail!("target version {} must be newer than the current version {}", target, current);
    }
    ensure!(
        version::compare(target, current),
        "cannot compare target version {} with current version {}",
        target,
        current
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_newer() {
        assert!(ensure_newer("v1.23.0", "v1.24.1").is_ok());
        assert!(ensure_newer("v1.23.0", "v1.23.0").is_err());
        assert!(ensure_newer("v1.23.0", "v1.22.9").is_err());
        assert!(ensure_newer("v1.23.0", "latest").is_err());
    }

    #[test]
    fn test_without() {
        let masters = vec![Host::new("10.0.0.1", 22), Host::new("10.0.0.2", 22), Host::new("10.0.0.3", 22)];

        assert_eq!(
            without(&masters, &[Host::new("10.0.0.2", 22)]),
            vec![Host::new("10.0.0.1", 22), Host::new("10.0.0.3", 22)]
        );
        assert!(without(&masters, &masters).is_empty());
    }
}
