use crate::{
    error::LifecycleError,
    pki,
    remote::{Host, RemoteExecutor},
};
use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Utc};
use lazy_regex::regex_is_match;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;

/// Join credentials as printed by the token helper on the first master
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Token {
    pub(crate) join_token: String,
    #[serde(default)]
    pub(crate) discovery_token_ca_cert_hash: Vec<String>,
    #[serde(default)]
    pub(crate) certificate_key: String,
    #[serde(default)]
    pub(crate) expires: Option<DateTime<Utc>>,
}

/// 32 random bytes, hex encoded, as `kubeadm certs certificate-key` would print
pub(crate) fn create_certificate_key() -> String {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    hex::encode(key)
}

/// Hands out at most one token per lifecycle call. Concurrent callers wait on the same lock and
/// get the cached value once the first one has fetched it.
pub(crate) struct TokenCoordinator {
    helper: String,
    cached: Mutex<Option<Token>>,
}

impl TokenCoordinator {
    pub(crate) fn new(helper: &str) -> Self {
        Self {
            helper: helper.to_string(),
            cached: Mutex::new(None),
        }
    }

    pub(crate) async fn issue_token(
        &self,
        executor: &dyn RemoteExecutor,
        master0: &Host,
        remote_config_path: &str,
        certificate_key: &str,
        admin_kubeconfig: Option<&Path>,
    ) -> Result<Token> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let token = self
            .fetch(executor, master0, remote_config_path, certificate_key, admin_kubeconfig)
            .await
            .map_err(LifecycleError::TokenIssue)?;

        log::info!(
            "issued bootstrap token on {} with {} CA pin(s)",
            master0,
            token.discovery_token_ca_cert_hash.len()
        );

        *cached = Some(token.clone());
        Ok(token)
    }

    async fn fetch(
        &self,
        executor: &dyn RemoteExecutor,
        master0: &Host,
        remote_config_path: &str,
        certificate_key: &str,
        admin_kubeconfig: Option<&Path>,
    ) -> Result<Token> {
        let output = executor
            .run_and_capture(master0, &format!("{} {} {}", self.helper, remote_config_path, certificate_key))
            .await
            .with_context(|| format!("running token helper on {}", master0))?;

        let mut token: Token = serde_json::from_str(output.trim()).context("parsing token helper output")?;

        ensure!(
            regex_is_match!(r"^[a-z0-9]{6}\.[a-z0-9]{16}$", &token.join_token),
            "token helper returned a malformed bootstrap token"
        );

        if token.certificate_key.is_empty() {
            token.certificate_key = certificate_key.to_string();
        }

        if token.discovery_token_ca_cert_hash.is_empty() {
            let kubeconfig = admin_kubeconfig.context("no CA pins from token helper and no admin kubeconfig to compute them from")?;
            token.discovery_token_ca_cert_hash = pki::compute_ca_cert_pins(kubeconfig)?;
        }

        Ok(token)
    }
}
