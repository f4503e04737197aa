use crate::{
    cli::Command,
    config::LifecycleConfig,
    error::LifecycleError,
    kube_client::{KubernetesClient, NodeRef},
    kubeadm::{registry::TypeRegistry, KubeadmConfig},
    lifecycle::{Collaborators, Lifecycle},
    pki::RcgenCertAuthority,
    remote::{Host, RemoteExecutor},
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serial_test::serial;
use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Clone, Debug)]
pub(crate) enum Call {
    Run { host: Host, cmd: String },
    Copy { host: Host, remote_path: String, contents: String },
    Capture { host: Host, cmd: String },
}

struct Failure {
    ip: String,
    pattern: String,
    remaining: Option<usize>,
}

/// Records everything sent to hosts. Captured output comes from the first response whose pattern
/// appears in the command, commands matching a registered failure return an error.
#[derive(Default)]
pub(crate) struct FakeExecutor {
    responses: Vec<(String, String)>,
    failures: Mutex<Vec<Failure>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(mut self, pattern: &str, output: &str) -> Self {
        self.responses.push((pattern.to_string(), output.to_string()));
        self
    }

    pub(crate) fn fail_on(self, ip: &str, pattern: &str) -> Self {
        self.push_failure(ip, pattern, None)
    }

    /// Fail the first `times` matching commands, then let them through
    pub(crate) fn fail_times(self, ip: &str, pattern: &str, times: usize) -> Self {
        self.push_failure(ip, pattern, Some(times))
    }

    fn push_failure(self, ip: &str, pattern: &str, remaining: Option<usize>) -> Self {
        self.failures.lock().unwrap().push(Failure {
            ip: ip.to_string(),
            pattern: pattern.to_string(),
            remaining,
        });
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count_matching(&self, pattern: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| match call {
                Call::Run { cmd, .. } | Call::Capture { cmd, .. } => cmd.contains(pattern),
                Call::Copy { .. } => false,
            })
            .count()
    }

    pub(crate) fn commands_on(&self, ip: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Run { host, cmd } | Call::Capture { host, cmd } if host.ip == ip => Some(cmd),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn copied(&self, ip: &str, remote_path: &str) -> Option<String> {
        self.calls().into_iter().rev().find_map(|call| match call {
            Call::Copy {
                host,
                remote_path: path,
                contents,
            } if host.ip == ip && path == remote_path => Some(contents),
            _ => None,
        })
    }

    fn check_failure(&self, host: &Host, cmd: &str) -> Result<()> {
        let mut failures = self.failures.lock().unwrap();

        for failure in failures.iter_mut() {
            if failure.ip != host.ip || !cmd.contains(&failure.pattern) {
                continue;
            }
            match &mut failure.remaining {
                Some(0) => continue,
                Some(remaining) => *remaining -= 1,
                None => {}
            }
            bail!("{} failed on {}", failure.pattern, host);
        }

        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn run_sync(&self, host: &Host, cmds: &[String]) -> Result<()> {
        for cmd in cmds {
            self.calls.lock().unwrap().push(Call::Run {
                host: host.clone(),
                cmd: cmd.clone(),
            });
            self.check_failure(host, cmd)?;
        }
        Ok(())
    }

    async fn copy_file(&self, host: &Host, local_path: &Path, remote_path: &str) -> Result<()> {
        let contents = std::fs::read(local_path).with_context(|| format!("reading {}", local_path.display()))?;
        self.calls.lock().unwrap().push(Call::Copy {
            host: host.clone(),
            remote_path: remote_path.to_string(),
            contents: String::from_utf8_lossy(&contents).into_owned(),
        });
        Ok(())
    }

    async fn run_and_capture(&self, host: &Host, cmd: &str) -> Result<String> {
        self.calls.lock().unwrap().push(Call::Capture {
            host: host.clone(),
            cmd: cmd.to_string(),
        });
        self.check_failure(host, cmd)?;

        Ok(self
            .responses
            .iter()
            .find(|(pattern, _)| cmd.contains(pattern.as_str()))
            .map(|(_, output)| output.trim().to_string())
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub(crate) struct FakeKubeClient {
    nodes: Vec<NodeRef>,
    live_config: String,
    deleted: Mutex<Vec<String>>,
}

impl FakeKubeClient {
    fn with_nodes(nodes: &[(&str, &str)]) -> Self {
        Self {
            nodes: nodes
                .iter()
                .map(|(name, ip)| NodeRef {
                    name: name.to_string(),
                    internal_ip: Some(ip.to_string()),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn deleted(&self) -> Vec<String> {
        let mut deleted = self.deleted.lock().unwrap().clone();
        deleted.sort();
        deleted
    }
}

#[async_trait]
impl KubernetesClient for FakeKubeClient {
    async fn list_nodes(&self) -> Result<Vec<NodeRef>> {
        Ok(self.nodes.clone())
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn kubeadm_cluster_configuration(&self) -> Result<String> {
        Ok(self.live_config.clone())
    }
}

const TOKEN_JSON: &str = r#"{"JoinToken":"abcdef.0123456789abcdef","DiscoveryTokenCaCertHash":["sha256:aaaa"],"CertificateKey":"c0ffee"}"#;

const LIVE_CLUSTER_CONFIGURATION: &str = r#"apiVersion: kubeadm.k8s.io/v1beta3
kind: ClusterConfiguration
kubernetesVersion: v1.23.0
controlPlaneEndpoint: apiserver.cluster.local:6443
networking:
  dnsDomain: cluster.local
  podSubnet: 100.64.0.0/10
  serviceSubnet: 10.96.0.0/22
"#;

fn lifecycle_config(work_dir: &Path, masters: &[&str], nodes: &[&str], extra: &str) -> Result<LifecycleConfig> {
    let hosts = masters
        .iter()
        .map(|ip| format!("    - ip: {}\n      role: master\n", ip))
        .chain(nodes.iter().map(|ip| format!("    - ip: {}\n      role: node\n", ip)))
        .collect::<String>();

    LifecycleConfig::parse_from_config_file(
        format!(
            "cluster:\n  kubernetes_version: v1.23.0\n  hosts:\n{}work_dir: {}\n{}",
            hosts,
            work_dir.display(),
            extra
        )
        .as_bytes(),
    )
}

fn lifecycle<'a>(
    config: &'a LifecycleConfig,
    registry: &'a TypeRegistry,
    executor: &Arc<FakeExecutor>,
    kube_client: &Arc<FakeKubeClient>,
) -> Result<Lifecycle<'a>> {
    let collaborators = Collaborators {
        executor: Arc::clone(executor) as Arc<dyn RemoteExecutor>,
        kube_client: Arc::clone(kube_client) as Arc<dyn KubernetesClient>,
        cert_authority: Arc::new(RcgenCertAuthority::new(10, 1)),
    };

    Ok(Lifecycle::new(config, registry, collaborators)?.with_intervals(Duration::from_millis(1), Duration::from_millis(1)))
}

fn hosts(ips: &[&str]) -> Vec<String> {
    ips.iter().map(|ip| ip.to_string()).collect()
}

#[tokio::test]
#[serial]
async fn test_init_single_master() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let config = lifecycle_config(
        work_dir.path(),
        &["10.0.0.1"],
        &[],
        "registry:\n  domain: sealos.hub\n  ip: 10.0.0.1\n  username: admin\n  password: passw0rd\n",
    )?;
    let registry = TypeRegistry::new();
    let executor = Arc::new(FakeExecutor::new().respond("hostname", "Master-0"));
    let kube_client = Arc::new(FakeKubeClient::default());
    let lifecycle = lifecycle(&config, &registry, &executor, &kube_client)?;

    assert!(lifecycle.execute(&Command::Init).await?.is_none());

    let staged = std::fs::read_to_string(lifecycle.etc_dir().join("init-kubeadm.yaml"))?;
    assert!(staged.contains("apiVersion: kubeadm.k8s.io/v1beta3"));
    let init = KubeadmConfig::from_yaml(&registry, &staged)?;
    assert_eq!(init.init.local_api_endpoint.advertise_address.as_deref(), Some("10.0.0.1"));
    assert_eq!(
        init.cluster.control_plane_endpoint.as_deref(),
        Some("apiserver.cluster.local:6443")
    );
    assert!(init.init.node_registration.taints.is_some());

    let commands = executor.commands_on("10.0.0.1");
    let init_cmd = commands
        .iter()
        .find(|cmd| cmd.starts_with("kubeadm init"))
        .context("kubeadm init was not run")?;
    assert!(init_cmd.starts_with(
        "kubeadm init --config=/var/lib/kubeadm-lifecycle/etc/init-kubeadm.yaml --upload-certs --skip-certificate-key-print --skip-token-print"
    ));
    assert!(init_cmd.ends_with("--ignore-preflight-errors=SystemVerification -v 0"));
    assert!(commands.contains(&"grep -qF '10.0.0.1 apiserver.cluster.local' /etc/hosts || echo '10.0.0.1 apiserver.cluster.local' >> /etc/hosts".to_string()));

    assert!(executor
        .copied("10.0.0.1", "/etc/kubernetes/pki/ca.crt")
        .context("ca.crt was not copied")?
        .starts_with("-----BEGIN CERTIFICATE-----"));
    assert!(executor.copied("10.0.0.1", "/etc/kubernetes/admin.conf").is_some());
    assert!(executor
        .copied("10.0.0.1", "/var/lib/kubelet/config.json")
        .context("registry credentials were not copied")?
        .contains("sealos.hub"));

    assert_eq!(executor.count_matching("kubeadm-token"), 0);
    assert!(lifecycle.timings().iter().any(|timing| timing.step == "init 10.0.0.1:22"));
    Ok(())
}

#[tokio::test]
async fn test_init_joins_masters_and_nodes() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let config = lifecycle_config(work_dir.path(), &["10.0.0.1", "10.0.0.2"], &["10.0.0.5"], "")?;
    let registry = TypeRegistry::new();
    let executor = Arc::new(
        FakeExecutor::new()
            .respond("hostname", "host-a")
            .respond("kubeadm-token", TOKEN_JSON),
    );
    let kube_client = Arc::new(FakeKubeClient::default());
    let lifecycle = lifecycle(&config, &registry, &executor, &kube_client)?;

    lifecycle.execute(&Command::Init).await?;

    // One token serves both the master and the node joins
    assert_eq!(executor.count_matching("kubeadm-token"), 1);

    let join_master = KubeadmConfig::from_yaml(
        &registry,
        &std::fs::read_to_string(lifecycle.etc_dir().join("hosts/10.0.0.2/join-master-kubeadm.yaml"))?,
    )?;
    let control_plane = join_master.join.control_plane.context("join master config has no controlPlane")?;
    assert_eq!(control_plane.certificate_key.as_deref(), Some("c0ffee"));
    assert_eq!(control_plane.local_api_endpoint.advertise_address.as_deref(), Some("10.0.0.2"));

    let master_commands = executor.commands_on("10.0.0.2");
    assert!(master_commands
        .iter()
        .any(|cmd| cmd.starts_with("kubeadm join --config=/var/lib/kubeadm-lifecycle/etc/join-master-kubeadm.yaml")));
    assert!(executor.copied("10.0.0.2", "/etc/kubernetes/pki/etcd/ca.key").is_some());
    assert!(executor.copied("10.0.0.2", "/etc/kubernetes/pki/apiserver.crt").is_some());

    assert!(executor
        .commands_on("10.0.0.1")
        .iter()
        .any(|cmd| cmd.starts_with("kubeadm init phase upload-config kubeadm --config=")));

    let join_node = KubeadmConfig::from_yaml(
        &registry,
        &std::fs::read_to_string(lifecycle.etc_dir().join("hosts/10.0.0.5/join-node-kubeadm.yaml"))?,
    )?;
    let bootstrap_token = join_node
        .join
        .discovery
        .bootstrap_token
        .context("join node config has no bootstrapToken")?;
    assert_eq!(bootstrap_token.ca_cert_hashes, vec!["sha256:aaaa"]);
    assert_eq!(bootstrap_token.api_server_endpoint.as_deref(), Some("10.103.97.2:6443"));

    assert!(executor.commands_on("10.0.0.5").iter().any(|cmd| cmd
        == "lvscare care --run-once --vs 10.103.97.2:6443 --health-path /healthz --health-schem https --rs 10.0.0.1:6443 --rs 10.0.0.2:6443"));
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_join_nodes_share_one_token() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let config = lifecycle_config(work_dir.path(), &["10.0.0.1"], &["10.0.0.5", "10.0.0.6"], "")?;
    let registry = TypeRegistry::new();
    let executor = Arc::new(FakeExecutor::new().respond("kubeadm-token", TOKEN_JSON));
    let kube_client = Arc::new(FakeKubeClient::default());
    let lifecycle = lifecycle(&config, &registry, &executor, &kube_client)?;

    lifecycle
        .execute(&Command::JoinNodes {
            hosts: hosts(&["10.0.0.5", "10.0.0.6"]),
        })
        .await?;

    assert_eq!(executor.count_matching("kubeadm-token"), 1);

    for ip in ["10.0.0.5", "10.0.0.6"] {
        let staged = std::fs::read_to_string(lifecycle.etc_dir().join("hosts").join(ip).join("join-node-kubeadm.yaml"))?;
        let join = KubeadmConfig::from_yaml(&registry, &staged)?;
        assert_eq!(
            join.join.discovery.bootstrap_token.context("no bootstrapToken")?.ca_cert_hashes,
            vec!["sha256:aaaa"]
        );
        assert!(executor.commands_on(ip).contains(
            &"kubeadm join --config=/var/lib/kubeadm-lifecycle/etc/join-node-kubeadm.yaml -v 0".to_string()
        ));
        assert!(executor
            .commands_on(ip)
            .contains(&format!("grep -qF '{ip} lvscare.node.ip' /etc/hosts || echo '{ip} lvscare.node.ip' >> /etc/hosts", ip = ip)));
    }
    Ok(())
}

#[tokio::test]
async fn test_join_rejects_master0_and_undeclared_hosts() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let config = lifecycle_config(work_dir.path(), &["10.0.0.1", "10.0.0.2"], &["10.0.0.5"], "")?;
    let registry = TypeRegistry::new();
    let executor = Arc::new(FakeExecutor::new());
    let kube_client = Arc::new(FakeKubeClient::default());
    let lifecycle = lifecycle(&config, &registry, &executor, &kube_client)?;

    let err = lifecycle
        .execute(&Command::JoinMasters {
            hosts: hosts(&["10.0.0.1"]),
        })
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("master0"));

    let err = lifecycle
        .execute(&Command::JoinNodes {
            hosts: hosts(&["10.0.0.9"]),
        })
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("10.0.0.9 is not declared"));

    let err = lifecycle
        .execute(&Command::DeleteMasters {
            hosts: hosts(&["10.0.0.1"]),
        })
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("master0"));

    assert!(executor.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_nodes_partial_failure() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let config = lifecycle_config(work_dir.path(), &["10.0.0.1"], &["10.0.0.5", "10.0.0.6"], "")?;
    let registry = TypeRegistry::new();
    let executor = Arc::new(FakeExecutor::new().fail_on("10.0.0.6", "kubeadm reset"));
    let kube_client = Arc::new(FakeKubeClient::with_nodes(&[
        ("master-0", "10.0.0.1"),
        ("node-5", "10.0.0.5"),
        ("node-6", "10.0.0.6"),
    ]));
    let lifecycle = lifecycle(&config, &registry, &executor, &kube_client)?;

    for ip in ["10.0.0.5", "10.0.0.6"] {
        std::fs::create_dir_all(lifecycle.etc_dir().join("hosts").join(ip))?;
    }

    let failed = lifecycle
        .execute(&Command::DeleteNodes {
            hosts: hosts(&["10.0.0.5", "10.0.0.6"]),
        })
        .await?
        .context("expected a partial failure")?;

    assert_eq!(failed.attempted, 2);
    assert_eq!(failed.failed_hosts(), vec![&Host::new("10.0.0.6", 22)]);
    assert_eq!(kube_client.deleted(), vec!["node-5", "node-6"]);

    assert!(!lifecycle.etc_dir().join("hosts/10.0.0.5").exists());
    assert!(lifecycle.etc_dir().join("hosts/10.0.0.6").exists());

    let node_cleanup = executor
        .commands_on("10.0.0.5")
        .into_iter()
        .find(|cmd| cmd.starts_with("rm -rf"))
        .context("no cleanup on 10.0.0.5")?;
    assert!(!node_cleanup.contains("/var/lib/etcd"));
    Ok(())
}

#[tokio::test]
async fn test_delete_nodes_all_failed() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let config = lifecycle_config(work_dir.path(), &["10.0.0.1"], &["10.0.0.5"], "")?;
    let registry = TypeRegistry::new();
    let executor = Arc::new(FakeExecutor::new().fail_on("10.0.0.5", "kubeadm reset"));
    let kube_client = Arc::new(FakeKubeClient::default());
    let lifecycle = lifecycle(&config, &registry, &executor, &kube_client)?;

    let err = lifecycle
        .execute(&Command::DeleteNodes {
            hosts: hosts(&["10.0.0.5"]),
        })
        .await
        .unwrap_err();

    match err.downcast_ref::<LifecycleError>() {
        Some(LifecycleError::PartialFailure(failed)) => assert!(failed.all_failed()),
        other => bail!("unexpected error {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_delete_masters_resyncs_node_ipvs() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let config = lifecycle_config(work_dir.path(), &["10.0.0.1", "10.0.0.2"], &["10.0.0.5"], "")?;
    let registry = TypeRegistry::new();
    let executor = Arc::new(FakeExecutor::new());
    let kube_client = Arc::new(FakeKubeClient::with_nodes(&[("master-0", "10.0.0.1"), ("master-1", "10.0.0.2")]));
    let lifecycle = lifecycle(&config, &registry, &executor, &kube_client)?;

    assert!(lifecycle
        .execute(&Command::DeleteMasters {
            hosts: hosts(&["10.0.0.2"]),
        })
        .await?
        .is_none());

    assert_eq!(kube_client.deleted(), vec!["master-1"]);
    assert!(executor
        .commands_on("10.0.0.2")
        .iter()
        .any(|cmd| cmd.starts_with("rm -rf") && cmd.ends_with("/var/lib/etcd")));
    assert!(executor.commands_on("10.0.0.5").contains(
        &"lvscare care --run-once --vs 10.103.97.2:6443 --health-path /healthz --health-schem https --rs 10.0.0.1:6443".to_string()
    ));
    Ok(())
}

#[tokio::test]
async fn test_reset() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let config = lifecycle_config(
        work_dir.path(),
        &["10.0.0.1"],
        &["10.0.0.5"],
        "registry:\n  domain: sealos.hub\n  ip: 10.0.0.1\n",
    )?;
    let registry = TypeRegistry::new();
    let executor = Arc::new(FakeExecutor::new());
    let kube_client = Arc::new(FakeKubeClient::default());
    let lifecycle = lifecycle(&config, &registry, &executor, &kube_client)?;

    assert!(lifecycle.execute(&Command::Reset).await?.is_none());

    for ip in ["10.0.0.1", "10.0.0.5"] {
        let commands = executor.commands_on(ip);
        assert_eq!(commands[0], "sed -i '/ sealos\\.hub$/d' /etc/hosts");
        assert!(commands.contains(&"kubeadm reset -f".to_string()));
        assert!(commands.contains(&"(command -v ipvsadm >/dev/null && ipvsadm -C) || true".to_string()));
    }

    // Masters come after every node
    let calls = executor.calls();
    let last_node_reset = calls
        .iter()
        .rposition(|call| matches!(call, Call::Run { host, cmd } if host.ip == "10.0.0.5" && cmd == "kubeadm reset -f"));
    let first_master_reset = calls
        .iter()
        .position(|call| matches!(call, Call::Run { host, cmd } if host.ip == "10.0.0.1" && cmd == "kubeadm reset -f"));
    assert!(last_node_reset < first_master_reset);
    Ok(())
}

#[tokio::test]
async fn test_reset_keeps_going_past_a_failed_node() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let config = lifecycle_config(work_dir.path(), &["10.0.0.1"], &["10.0.0.5"], "")?;
    let registry = TypeRegistry::new();
    let executor = Arc::new(FakeExecutor::new().fail_on("10.0.0.5", "kubeadm reset"));
    let kube_client = Arc::new(FakeKubeClient::default());
    let lifecycle = lifecycle(&config, &registry, &executor, &kube_client)?;

    let failed = lifecycle.execute(&Command::Reset).await?.context("expected a partial failure")?;

    assert_eq!(failed.failed_hosts(), vec![&Host::new("10.0.0.5", 22)]);
    assert!(executor.commands_on("10.0.0.1").contains(&"kubeadm reset -f".to_string()));
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_upgrade_retries_uncordon() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let config = lifecycle_config(work_dir.path(), &["10.0.0.1"], &["10.0.0.5"], "")?;
    let registry = TypeRegistry::new();
    let executor = Arc::new(
        FakeExecutor::new()
            .respond("hostname", "Node-5")
            .fail_times("10.0.0.1", "kubectl uncordon", 2),
    );
    let kube_client = Arc::new(FakeKubeClient {
        live_config: LIVE_CLUSTER_CONFIGURATION.to_string(),
        ..Default::default()
    });
    let lifecycle = lifecycle(&config, &registry, &executor, &kube_client)?;

    lifecycle
        .execute(&Command::Upgrade {
            version: "v1.27.3".to_string(),
        })
        .await?;

    let master_commands = executor.commands_on("10.0.0.1");
    let written = master_commands
        .iter()
        .find(|cmd| cmd.starts_with("cat > /var/lib/kubeadm-lifecycle/etc/upgrade-kubeadm.yaml << 'EOF'"))
        .context("upgrade config was not written")?;
    assert!(written.contains("kubernetesVersion: v1.27.3"));
    assert!(written.contains("serviceSubnet: 10.96.0.0/22"));
    assert!(master_commands.contains(
        &"kubeadm upgrade apply --config=/var/lib/kubeadm-lifecycle/etc/upgrade-kubeadm.yaml --yes -v 0".to_string()
    ));
    assert!(master_commands.contains(&"kubectl drain node-5 --ignore-daemonsets --delete-emptydir-data --force".to_string()));

    let node_commands = executor.commands_on("10.0.0.5");
    assert!(node_commands.contains(&"cp -f /var/lib/kubeadm-lifecycle/rootfs/bin/kubeadm /usr/bin/kubeadm".to_string()));
    assert!(node_commands.contains(&"kubeadm upgrade node -v 0".to_string()));
    assert!(node_commands.iter().any(|cmd| cmd.contains("--container-runtime=remote")));
    assert_eq!(node_commands.last().map(String::as_str), Some("systemctl restart kubelet"));

    assert_eq!(executor.count_matching("kubectl uncordon node-5"), 3);
    Ok(())
}

#[tokio::test]
async fn test_upgrade_uncordon_gives_up() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let config = lifecycle_config(work_dir.path(), &["10.0.0.1"], &["10.0.0.5"], "uncordon_timeout_seconds: 0\n")?;
    let registry = TypeRegistry::new();
    let executor = Arc::new(
        FakeExecutor::new()
            .respond("hostname", "node-5")
            .fail_on("10.0.0.1", "kubectl uncordon"),
    );
    let kube_client = Arc::new(FakeKubeClient::default());
    let lifecycle = lifecycle(&config, &registry, &executor, &kube_client)?;

    let err = lifecycle
        .execute(&Command::Upgrade {
            version: "v1.24.0".to_string(),
        })
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).contains("uncordon node-5 did not succeed within 0s"));
    assert!(executor
        .commands_on("10.0.0.5")
        .iter()
        .all(|cmd| !cmd.contains("--container-runtime=remote")));
    Ok(())
}

#[tokio::test]
async fn test_upgrade_requires_newer_version() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let config = lifecycle_config(work_dir.path(), &["10.0.0.1"], &[], "")?;
    let registry = TypeRegistry::new();
    let executor = Arc::new(FakeExecutor::new());
    let kube_client = Arc::new(FakeKubeClient::default());
    let lifecycle = lifecycle(&config, &registry, &executor, &kube_client)?;

    for version in ["v1.23.0", "v1.22.4"] {
        assert!(lifecycle
            .execute(&Command::Upgrade {
                version: version.to_string(),
            })
            .await
            .is_err());
    }
    assert!(executor.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_sync_ipvs() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let config = lifecycle_config(
        work_dir.path(),
        &["10.0.0.1", "10.0.0.2"],
        &["10.0.0.5", "10.0.0.6"],
        "lvscare_image: registry.local/lvscare:v4\n",
    )?;
    let registry = TypeRegistry::new();
    let executor = Arc::new(FakeExecutor::new());
    let kube_client = Arc::new(FakeKubeClient::default());
    let lifecycle = lifecycle(&config, &registry, &executor, &kube_client)?;

    lifecycle.execute(&Command::SyncIpvs).await?;

    for ip in ["10.0.0.5", "10.0.0.6"] {
        let commands = executor.commands_on(ip);
        let manifest = commands
            .iter()
            .find(|cmd| cmd.starts_with("cat > /etc/kubernetes/manifests/kube-lvscare.yaml"))
            .context("lvscare manifest was not written")?;
        assert!(manifest.contains("image: registry.local/lvscare:v4"));
        assert!(manifest.contains("- \"10.0.0.2:6443\""));
        assert!(commands.iter().any(|cmd| cmd.starts_with("lvscare care --run-once")));
    }
    assert!(executor.commands_on("10.0.0.1").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_wait_ssh_ready_retries() -> Result<()> {
    let hosts = [Host::new("10.0.0.1", 22), Host::new("10.0.0.5", 22)];

    let executor = FakeExecutor::new().fail_times("10.0.0.5", "true", 2);
    crate::remote::wait_ssh_ready(&executor, &hosts, 3, Duration::from_millis(1)).await?;
    assert_eq!(executor.commands_on("10.0.0.1").len(), 1);
    assert_eq!(executor.commands_on("10.0.0.5").len(), 3);

    let executor = FakeExecutor::new().fail_on("10.0.0.5", "true");
    let err = crate::remote::wait_ssh_ready(&executor, &hosts, 2, Duration::from_millis(1))
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("10.0.0.5:22 not reachable after 2 attempts"));

    Ok(())
}
