use self::path::ConfigPath;
use crate::{
    cli::Cli,
    kubeadm::DocumentKind,
    net_utils,
    remote::Host,
    template::patch::Patch,
    version::KubeVersion,
};
use anyhow::{bail, ensure, Context, Result};
use base64::{engine::general_purpose::STANDARD as base64_standard, Engine as _};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{path::PathBuf, str::FromStr, time::Duration};

pub(crate) mod path;

const DEFAULT_VIP: &str = "10.103.97.2";
const DEFAULT_APISERVER_DOMAIN: &str = "apiserver.cluster.local";
const DEFAULT_REMOTE_ROOTFS: &str = "/var/lib/kubeadm-lifecycle/rootfs";
const DEFAULT_REMOTE_ETC: &str = "/var/lib/kubeadm-lifecycle/etc";
const DEFAULT_TOKEN_HELPER: &str = "/usr/bin/kubeadm-token";
const DEFAULT_LVSCARE_IMAGE: &str = "ghcr.io/labring/lvscare:latest";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Role {
    Master,
    Node,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct HostSpec {
    pub(crate) ip: String,
    pub(crate) role: Role,
    #[serde(default)]
    pub(crate) port: Option<u16>,
}

fn default_vip() -> String {
    DEFAULT_VIP.to_string()
}

fn default_apiserver_domain() -> String {
    DEFAULT_APISERVER_DOMAIN.to_string()
}

fn default_dns_domain() -> String {
    crate::kubeadm::DEFAULT_DNS_DOMAIN.to_string()
}

/// The declared membership of the cluster, masters in order, the first one being master0
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ClusterSpec {
    pub(crate) kubernetes_version: String,
    pub(crate) hosts: Vec<HostSpec>,
    #[serde(default)]
    pub(crate) pod_subnet: Option<String>,
    #[serde(default)]
    pub(crate) service_subnet: Option<String>,
    #[serde(default = "default_vip")]
    pub(crate) vip: String,
    #[serde(default = "default_apiserver_domain")]
    pub(crate) apiserver_domain: String,
    #[serde(default = "default_dns_domain")]
    pub(crate) dns_domain: String,
    #[serde(default)]
    pub(crate) cert_sans: Vec<String>,
    #[serde(default)]
    pub(crate) image_endpoint: Option<String>,
}

impl ClusterSpec {
    fn validate(&self) -> Result<()> {
        ensure!(
            KubeVersion::parse(&self.kubernetes_version).is_some(),
            "kubernetes_version {:?} is not a vMAJOR.MINOR.PATCH version",
            self.kubernetes_version
        );
        ensure!(net_utils::is_ip(&self.vip), "vip {:?} is not an IP address", self.vip);

        for host in &self.hosts {
            ensure!(net_utils::is_ip(&host.ip), "host {:?} is not an IP address", host.ip);
        }

        let duplicates = self.hosts.iter().map(|host| host.ip.as_str()).duplicates().collect::<Vec<_>>();
        ensure!(duplicates.is_empty(), "hosts declared more than once: {}", duplicates.join(", "));

        ensure!(
            self.hosts.iter().any(|host| host.role == Role::Master),
            "at least one host must have the master role"
        );

        Ok(())
    }

    fn hosts_with_role(&self, role: Role, default_port: u16) -> Vec<Host> {
        self.hosts
            .iter()
            .filter(|host| host.role == role)
            .map(|host| Host::new(&host.ip, host.port.unwrap_or(default_port)))
            .collect()
    }

    pub(crate) fn masters(&self, default_port: u16) -> Vec<Host> {
        self.hosts_with_role(Role::Master, default_port)
    }

    pub(crate) fn nodes(&self, default_port: u16) -> Vec<Host> {
        self.hosts_with_role(Role::Node, default_port)
    }
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_scp_binary() -> String {
    "scp".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SshConfig {
    #[serde(default = "default_ssh_user")]
    pub(crate) user: String,
    #[serde(default = "default_ssh_port")]
    pub(crate) port: u16,
    #[serde(default)]
    pub(crate) identity_file: Option<PathBuf>,
    #[serde(default = "default_connect_timeout")]
    pub(crate) connect_timeout_seconds: u64,
    #[serde(default = "default_ssh_binary")]
    pub(crate) ssh_binary: String,
    #[serde(default = "default_scp_binary")]
    pub(crate) scp_binary: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            port: default_ssh_port(),
            identity_file: None,
            connect_timeout_seconds: default_connect_timeout(),
            ssh_binary: default_ssh_binary(),
            scp_binary: default_scp_binary(),
        }
    }
}

fn redact_password<S: serde::Serializer>(password: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match password {
        Some(_) => "<redacted>".serialize(serializer),
        None => serializer.serialize_none(),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RegistryConfig {
    pub(crate) domain: String,
    pub(crate) ip: String,
    #[serde(default)]
    pub(crate) username: Option<String>,
    #[serde(default, serialize_with = "redact_password")]
    pub(crate) password: Option<String>,
}

impl RegistryConfig {
    /// The docker config.json `auth` value, when credentials are configured
    pub(crate) fn auth(&self) -> Option<String> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(base64_standard.encode(format!("{}:{}", username, password))),
            _ => None,
        }
    }
}

/// A local file copied verbatim onto every master
#[derive(Clone, Debug, Serialize)]
pub(crate) struct StaticFile {
    pub(crate) source: ConfigPath,
    pub(crate) destination: String,
}

fn serialize_level<S: serde::Serializer>(level: &log::LevelFilter, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&level.to_string().to_lowercase())
}

/// Everything the config file holds, coalesced into a single struct for convenience
#[derive(Clone, Debug, Serialize)]
pub(crate) struct LifecycleConfig {
    pub(crate) cluster: ClusterSpec,
    pub(crate) ssh: SshConfig,
    pub(crate) image_rootfs: Option<ConfigPath>,
    pub(crate) remote_rootfs: String,
    pub(crate) remote_etc: String,
    pub(crate) work_dir: PathBuf,
    pub(crate) kubeadm_config: Option<ConfigPath>,
    #[serde(skip)]
    pub(crate) kubeadm_config_raw: Option<String>,
    pub(crate) patches: Vec<Patch>,
    pub(crate) static_files: Vec<StaticFile>,
    pub(crate) registry: Option<RegistryConfig>,
    pub(crate) token_helper: String,
    pub(crate) cert_authority_validity_years: u32,
    pub(crate) cert_validity_years: u32,
    pub(crate) uncordon_timeout_seconds: u64,
    pub(crate) api_server_wait_seconds: u64,
    pub(crate) ssh_ready_attempts: u32,
    pub(crate) lvscare_image: String,
    pub(crate) threads: Option<usize>,
    #[serde(serialize_with = "serialize_level")]
    pub(crate) log_level: log::LevelFilter,
    pub(crate) summary_file: Option<ConfigPath>,
}

fn remove_string(value: &mut Map<String, Value>, key: &str) -> Result<Option<String>> {
    value
        .remove(key)
        .map(|value| value.as_str().map(str::to_string).with_context(|| format!("{} must be a string", key)))
        .transpose()
}

fn remove_u64(value: &mut Map<String, Value>, key: &str) -> Result<Option<u64>> {
    value
        .remove(key)
        .map(|value| value.as_u64().with_context(|| format!("{} must be a non-negative integer", key)))
        .transpose()
}

fn remove_u32(value: &mut Map<String, Value>, key: &str) -> Result<Option<u32>> {
    remove_u64(value, key)?
        .map(|number| u32::try_from(number).with_context(|| format!("{} is too large", key)))
        .transpose()
}

fn parse_patch(value: &Value) -> Result<Patch> {
    let mut fields = value.as_object().context("patch must be a mapping")?.clone();

    let target = remove_string(&mut fields, "target")?.context("target is required")?;
    let target = DocumentKind::from_str(&target)
        .with_context(|| format!("target {:?} is not one of the kubeadm document kinds", target))?;

    let patch_type = remove_string(&mut fields, "type")?.unwrap_or_else(|| "json".to_string());

    let body = match fields.remove("patch").context("patch is required")? {
        // Inline YAML text is accepted as well as a structured value
        Value::String(text) => serde_yaml::from_str(&text).context("parsing patch text")?,
        body => body,
    };

    ensure!(fields.is_empty(), "unknown patch keys: {}", fields.keys().join(", "));

    match patch_type.as_str() {
        "json" => Patch::json(target, body),
        "strategic" => Patch::strategic_merge(target, body),
        other => bail!("patch type must be json or strategic, not {:?}", other),
    }
}

fn parse_static_file(value: &Value) -> Result<StaticFile> {
    let mut fields = value.as_object().context("static file must be a mapping")?.clone();

    let source = remove_string(&mut fields, "source")?.context("source is required")?;
    let destination = remove_string(&mut fields, "destination")?.context("destination is required")?;

    ensure!(destination.starts_with('/'), "destination {:?} must be an absolute path", destination);
    ensure!(fields.is_empty(), "unknown static file keys: {}", fields.keys().join(", "));

    Ok(StaticFile {
        source: ConfigPath::existing_file(&source)?,
        destination,
    })
}

impl LifecycleConfig {
    pub(crate) fn load(cli: &Cli) -> Result<Self> {
        let config_bytes = std::fs::read(cli.config.path()).with_context(|| format!("reading {}", cli.config))?;

        let mut config = Self::parse_from_config_file(&config_bytes).with_context(|| format!("parsing {}", cli.config))?;

        if let Some(log_level) = cli.log_level {
            config.log_level = log_level;
        }

        if let Some(summary_file) = &cli.summary_file {
            config.summary_file = Some(ConfigPath::from(summary_file.clone()));
        }

        Ok(config)
    }

    pub(crate) fn parse_from_config_file(config_bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_yaml::from_slice(config_bytes)?;

        let mut value = value.as_object().context("config file must be a YAML object")?.clone();

        let cluster: ClusterSpec =
            serde_json::from_value(value.remove("cluster").context("cluster is required")?).context("parsing cluster")?;
        cluster.validate().context("validating cluster")?;

        let ssh: SshConfig = match value.remove("ssh") {
            Some(value) => serde_json::from_value(value).context("parsing ssh")?,
            None => SshConfig::default(),
        };

        if let Some(identity_file) = &ssh.identity_file {
            ensure!(identity_file.is_file(), "ssh identity_file must exist: {}", identity_file.display());
        }

        let image_rootfs = remove_string(&mut value, "image_rootfs")?
            .map(|path| ConfigPath::existing_dir(&path).context("image_rootfs"))
            .transpose()?;

        let remote_rootfs = remove_string(&mut value, "remote_rootfs")?.unwrap_or_else(|| DEFAULT_REMOTE_ROOTFS.to_string());
        let remote_etc = remove_string(&mut value, "remote_etc")?.unwrap_or_else(|| DEFAULT_REMOTE_ETC.to_string());

        for (key, remote_path) in [("remote_rootfs", &remote_rootfs), ("remote_etc", &remote_etc)] {
            ensure!(remote_path.starts_with('/'), "{} must be an absolute path", key);
        }

        let work_dir = match remove_string(&mut value, "work_dir")? {
            Some(work_dir) => PathBuf::from(work_dir),
            None => std::env::temp_dir(),
        };

        let kubeadm_config = remove_string(&mut value, "kubeadm_config")?
            .map(|path| ConfigPath::existing_file(&path).context("kubeadm_config"))
            .transpose()?;

        let kubeadm_config_raw = match &kubeadm_config {
            Some(path) => Some(std::fs::read_to_string(&**path).with_context(|| format!("reading {}", path))?),
            None => None,
        };

        let patches = match value.remove("patches") {
            Some(value) => value
                .as_array()
                .context("patches must be an array")?
                .iter()
                .enumerate()
                .map(|(index, value)| parse_patch(value).with_context(|| format!("patch {}", index)))
                .collect::<Result<Vec<_>>>()?,
            None => vec![],
        };

        let static_files = match value.remove("static_files") {
            Some(value) => value
                .as_array()
                .context("static_files must be an array")?
                .iter()
                .enumerate()
                .map(|(index, value)| parse_static_file(value).with_context(|| format!("static file {}", index)))
                .collect::<Result<Vec<_>>>()?,
            None => vec![],
        };

        let registry: Option<RegistryConfig> = match value.remove("registry") {
            Some(value) => Some(serde_json::from_value(value).context("parsing registry")?),
            None => None,
        };

        if let Some(registry) = &registry {
            ensure!(net_utils::is_ip(&registry.ip), "registry ip {:?} is not an IP address", registry.ip);
            ensure!(
                registry.username.is_some() == registry.password.is_some(),
                "registry username and password must be given together"
            );
        }

        let token_helper = remove_string(&mut value, "token_helper")?.unwrap_or_else(|| DEFAULT_TOKEN_HELPER.to_string());

        let cert_authority_validity_years = remove_u32(&mut value, "cert_authority_validity_years")?.unwrap_or(10);
        let cert_validity_years = remove_u32(&mut value, "cert_validity_years")?.unwrap_or(1);
        ensure!(
            cert_validity_years > 0 && cert_validity_years <= cert_authority_validity_years,
            "cert_validity_years must be between 1 and cert_authority_validity_years"
        );

        let uncordon_timeout_seconds = remove_u64(&mut value, "uncordon_timeout_seconds")?.unwrap_or(120);
        let api_server_wait_seconds = remove_u64(&mut value, "api_server_wait_seconds")?.unwrap_or(60);
        let ssh_ready_attempts = remove_u32(&mut value, "ssh_ready_attempts")?.unwrap_or(10);
        ensure!(ssh_ready_attempts > 0, "ssh_ready_attempts must be at least 1");

        let lvscare_image = remove_string(&mut value, "lvscare_image")?.unwrap_or_else(|| DEFAULT_LVSCARE_IMAGE.to_string());

        let threads = remove_u64(&mut value, "threads")?
            .map(|threads| usize::try_from(threads).context("threads is too large"))
            .transpose()?;
        if let Some(threads) = threads {
            ensure!(threads > 0, "threads must be at least 1");
        }

        let log_level = match remove_string(&mut value, "log_level")? {
            Some(level) => log::LevelFilter::from_str(&level).with_context(|| format!("log_level {:?} is not a log level", level))?,
            None => log::LevelFilter::Info,
        };

        let summary_file = remove_string(&mut value, "summary_file")?
            .map(|path| ConfigPath::new(&path).context("summary_file"))
            .transpose()?;

        ensure!(
            value.is_empty(),
            "unknown keys {:?} in config file",
            value.keys().map(String::as_str).collect::<Vec<_>>()
        );

        Ok(Self {
            cluster,
            ssh,
            image_rootfs,
            remote_rootfs,
            remote_etc,
            work_dir,
            kubeadm_config,
            kubeadm_config_raw,
            patches,
            static_files,
            registry,
            token_helper,
            cert_authority_validity_years,
            cert_validity_years,
            uncordon_timeout_seconds,
            api_server_wait_seconds,
            ssh_ready_attempts,
            lvscare_image,
            threads,
            log_level,
            summary_file,
        })
    }

    pub(crate) fn masters(&self) -> Vec<Host> {
        self.cluster.masters(self.ssh.port)
    }

    pub(crate) fn nodes(&self) -> Vec<Host> {
        self.cluster.nodes(self.ssh.port)
    }

    pub(crate) fn uncordon_timeout(&self) -> Duration {
        Duration::from_secs(self.uncordon_timeout_seconds)
    }

    pub(crate) fn api_server_wait(&self) -> Duration {
        Duration::from_secs(self.api_server_wait_seconds)
    }

    /// Remote path of one generated kubeadm file
    pub(crate) fn remote_etc_file(&self, file_name: &str) -> String {
        format!("{}/{}", self.remote_etc.trim_end_matches('/'), file_name)
    }

    pub(crate) fn remote_bin(&self, binary: &str) -> String {
        format!("{}/bin/{}", self.remote_rootfs.trim_end_matches('/'), binary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::patch::PatchBody;

    const MINIMAL: &str = r#"
cluster:
  kubernetes_version: v1.23.0
  hosts:
    - ip: 10.0.0.1
      role: master
    - ip: 10.0.0.5
      role: node
      port: 2222
"#;

    #[test]
    fn test_defaults() -> Result<()> {
        let config = LifecycleConfig::parse_from_config_file(MINIMAL.as_bytes())?;

        assert_eq!(config.cluster.vip, "10.103.97.2");
        assert_eq!(config.cluster.apiserver_domain, "apiserver.cluster.local");
        assert_eq!(config.cluster.dns_domain, "cluster.local");
        assert_eq!(config.ssh.user, "root");
        assert_eq!(config.remote_etc_file("init-kubeadm.yaml"), "/var/lib/kubeadm-lifecycle/etc/init-kubeadm.yaml");
        assert_eq!(config.remote_bin("kubeadm"), "/var/lib/kubeadm-lifecycle/rootfs/bin/kubeadm");
        assert_eq!(config.token_helper, "/usr/bin/kubeadm-token");
        assert_eq!(config.uncordon_timeout(), Duration::from_secs(120));
        assert_eq!(config.log_level, log::LevelFilter::Info);
        assert_eq!(config.masters(), vec![Host::new("10.0.0.1", 22)]);
        assert_eq!(config.nodes(), vec![Host::new("10.0.0.5", 2222)]);
        assert!(config.patches.is_empty());
        Ok(())
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = LifecycleConfig::parse_from_config_file(format!("{}etcd_endpoint: localhost:2379\n", MINIMAL).as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("etcd_endpoint"));

        let err =
            LifecycleConfig::parse_from_config_file(MINIMAL.replace("role: node", "role: node\n      labels: {}").as_bytes())
                .unwrap_err();
        assert!(format!("{:#}", err).contains("labels"));
    }

    #[test]
    fn test_cluster_validation() {
        for (from, to) in [
            ("role: master", "role: node"),
            ("v1.23.0", "latest"),
            ("10.0.0.5", "10.0.0.1"),
            ("10.0.0.5", "node-5"),
        ] {
            assert!(
                LifecycleConfig::parse_from_config_file(MINIMAL.replacen(from, to, 1).as_bytes()).is_err(),
                "{} -> {}",
                from,
                to
            );
        }
    }

    #[test]
    fn test_patches() -> Result<()> {
        let config = LifecycleConfig::parse_from_config_file(
            format!(
                r#"{}
patches:
  - target: ClusterConfiguration
    patch:
      - op: add
        path: /apiServer/extraArgs/v
        value: "2"
  - target: KubeletConfiguration
    type: strategic
    patch: |
      maxPods: 200
"#,
                MINIMAL
            )
            .as_bytes(),
        )?;

        assert_eq!(config.patches.len(), 2);
        assert_eq!(config.patches[0].target, DocumentKind::Cluster);
        assert!(matches!(config.patches[0].body, PatchBody::Json(_)));
        assert_eq!(config.patches[1].target, DocumentKind::Kubelet);
        assert!(matches!(&config.patches[1].body, PatchBody::StrategicMerge(fragment) if fragment["maxPods"] == 200));

        let bad_target = format!("{}patches:\n  - target: Pod\n    patch: []\n", MINIMAL);
        assert!(LifecycleConfig::parse_from_config_file(bad_target.as_bytes()).is_err());
        Ok(())
    }

    #[test]
    fn test_registry_password_redacted() -> Result<()> {
        let config = LifecycleConfig::parse_from_config_file(
            format!(
                "{}registry:\n  domain: sealos.hub\n  ip: 10.0.0.1\n  username: admin\n  password: passw0rd\n",
                MINIMAL
            )
            .as_bytes(),
        )?;

        let registry = config.registry.as_ref().context("registry")?;
        assert_eq!(registry.auth().as_deref(), Some("YWRtaW46cGFzc3cwcmQ="));

        let serialized = serde_yaml::to_string(&config)?;
        assert!(!serialized.contains("passw0rd"));
        assert!(serialized.contains("<redacted>"));
        Ok(())
    }

    #[test]
    fn test_static_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let policy = dir.path().join("audit-policy.yml");
        std::fs::write(&policy, "apiVersion: audit.k8s.io/v1\nkind: Policy\n")?;

        let config = LifecycleConfig::parse_from_config_file(
            format!(
                "{}static_files:\n  - source: {}\n    destination: /etc/kubernetes/audit-policy.yml\n",
                MINIMAL,
                policy.display()
            )
            .as_bytes(),
        )?;
        assert_eq!(config.static_files[0].destination, "/etc/kubernetes/audit-policy.yml");

        let relative = format!(
            "{}static_files:\n  - source: {}\n    destination: audit-policy.yml\n",
            MINIMAL,
            policy.display()
        );
        assert!(LifecycleConfig::parse_from_config_file(relative.as_bytes()).is_err());
        Ok(())
    }
}
