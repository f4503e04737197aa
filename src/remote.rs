use crate::file_utils;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use std::{path::Path, time::Duration};

pub(crate) mod ssh;

/// A machine reachable over SSH
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub(crate) struct Host {
    pub(crate) ip: String,
    pub(crate) port: u16,
}

impl Host {
    pub(crate) fn new(ip: &str, port: u16) -> Self {
        Self { ip: ip.to_string(), port }
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ip.contains(':') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

#[async_trait]
pub(crate) trait RemoteExecutor: Send + Sync {
    /// Run commands in order on the host, stopping at the first failure
    async fn run_sync(&self, host: &Host, cmds: &[String]) -> Result<()>;

    async fn copy_file(&self, host: &Host, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Run a single command and return its trimmed stdout
    async fn run_and_capture(&self, host: &Host, cmd: &str) -> Result<String>;
}

pub(crate) fn append_hosts_entry_cmd(ip: &str, domain: &str) -> String {
    format!(
        "grep -qF '{ip} {domain}' /etc/hosts || echo '{ip} {domain}' >> /etc/hosts",
        ip = ip,
        domain = domain
    )
}

pub(crate) fn remove_hosts_entry_cmd(domain: &str) -> String {
    format!("sed -i '/ {}$/d' /etc/hosts", domain.replace('.', "\\."))
}

/// Point `domain` at `ip`, replacing whatever address it was pinned to before
pub(crate) fn replace_hosts_entry_cmds(ip: &str, domain: &str) -> Vec<String> {
    vec![remove_hosts_entry_cmd(domain), append_hosts_entry_cmd(ip, domain)]
}

pub(crate) fn write_file_cmd(remote_path: &str, content: &str) -> String {
    format!("cat > {} << 'EOF'\n{}\nEOF", remote_path, content.trim_end())
}

pub(crate) fn mkdir_cmd(remote_dir: &str) -> String {
    format!("mkdir -p {}", remote_dir)
}

/// Copy every regular file under `local_dir` to the same relative location under `remote_dir`
pub(crate) async fn copy_dir(
    executor: &dyn RemoteExecutor,
    host: &Host,
    local_dir: &Path,
    remote_dir: &str,
    filter: impl Fn(&Path) -> bool,
) -> Result<()> {
    for file in file_utils::globvec(local_dir, "**/*")? {
        let relative = file.strip_prefix(local_dir).context("file escaped its directory")?;
        if !filter(relative) {
            continue;
        }

        let remote_path = format!(
            "{}/{}",
            remote_dir.trim_end_matches('/'),
            relative.to_str().with_context(|| format!("non-unicode path {}", relative.display()))?
        );

        executor
            .copy_file(host, &file, &remote_path)
            .await
            .with_context(|| format!("copying {} to {}:{}", file.display(), host, remote_path))?;
    }

    Ok(())
}

/// Keep probing each host with a no-op command until it answers or the attempts run out
pub(crate) async fn wait_ssh_ready(executor: &dyn RemoteExecutor, hosts: &[Host], attempts: u32, interval: Duration) -> Result<()> {
    try_join_all(hosts.iter().map(|host| async move {
        let mut attempt = 1;
        loop {
            match executor.run_sync(host, &["true".to_string()]).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt >= attempts => {
                    return Err(err).with_context(|| format!("{} not reachable after {} attempts", host, attempts));
                }
                Err(err) => {
                    log::debug!("{} not ready yet ({:#}), retrying", host, err);
                    attempt += 1;
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }))
    .await?;

    Ok(())
}
