use super::{mkdir_cmd, Host, RemoteExecutor};
use crate::error::LifecycleError;
use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::{io::AsyncWriteExt, process::Command};

#[derive(Clone, Debug)]
pub(crate) struct SshSettings {
    pub(crate) user: String,
    pub(crate) identity_file: Option<PathBuf>,
    pub(crate) connect_timeout_seconds: u64,
    pub(crate) ssh_binary: String,
    pub(crate) scp_binary: String,
}

/// RemoteExecutor on top of the OpenSSH client binaries
pub(crate) struct SshExecutor {
    settings: SshSettings,
}

impl SshExecutor {
    pub(crate) fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    fn common_args(&self, port_flag: &str, host: &Host) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.settings.connect_timeout_seconds),
            port_flag.to_string(),
            host.port.to_string(),
        ];

        if let Some(identity_file) = &self.settings.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.display().to_string());
        }

        args
    }

    /// Feed `script` to a remote shell on stdin and collect its stdout
    async fn run_script(&self, host: &Host, script: &str) -> Result<String> {
        let mut child = Command::new(&self.settings.ssh_binary)
            .args(self.common_args("-p", host))
            .arg(format!("{}@{}", self.settings.user, host.ip))
            .arg("bash -s")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.settings.ssh_binary))?;

        let mut stdin = child.stdin.take().context("ssh stdin not captured")?;
        stdin.write_all(script.as_bytes()).await.context("writing script to ssh")?;
        drop(stdin);

        let output = child.wait_with_output().await.context("waiting for ssh")?;

        ensure!(
            output.status.success(),
            "remote command exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn scp(&self, host: &Host, local_path: &Path, remote_path: &str) -> Result<()> {
        let target_ip = if host.ip.contains(':') {
            format!("[{}]", host.ip)
        } else {
            host.ip.clone()
        };

        let output = Command::new(&self.settings.scp_binary)
            .args(self.common_args("-P", host))
            .arg("-q")
            .arg(local_path)
            .arg(format!("{}@{}:{}", self.settings.user, target_ip, remote_path))
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("running {}", self.settings.scp_binary))?;

        ensure!(
            output.status.success(),
            "scp exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );

        Ok(())
    }
}

fn remote_error(host: &Host, source: anyhow::Error) -> anyhow::Error {
    LifecycleError::RemoteExec {
        host: host.clone(),
        source,
    }
    .into()
}

/// One command per line under `set -e`, heredocs stay intact
pub(crate) fn script(cmds: &[String]) -> String {
    let mut script = String::from("set -e\n");
    for cmd in cmds {
        script.push_str(cmd);
        script.push('\n');
    }
    script
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run_sync(&self, host: &Host, cmds: &[String]) -> Result<()> {
        log::debug!("[{}] {}", host, cmds.join(" && "));

        self.run_script(host, &script(cmds))
            .await
            .map(|_| ())
            .map_err(|err| remote_error(host, err))
    }

    async fn copy_file(&self, host: &Host, local_path: &Path, remote_path: &str) -> Result<()> {
        log::debug!("[{}] copy {} to {}", host, local_path.display(), remote_path);

        let copied = async {
            if let Some((remote_dir, _)) = remote_path.rsplit_once('/').filter(|(dir, _)| !dir.is_empty()) {
                self.run_script(host, &script(&[mkdir_cmd(remote_dir)])).await?;
            }
            self.scp(host, local_path, remote_path).await
        };

        copied.await.map_err(|err| remote_error(host, err))
    }

    async fn run_and_capture(&self, host: &Host, cmd: &str) -> Result<String> {
        log::debug!("[{}] {}", host, cmd);

        self.run_script(host, &script(&[cmd.to_string()]))
            .await
            .map(|output| output.trim().to_string())
            .map_err(|err| remote_error(host, err))
    }
}
