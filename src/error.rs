use crate::remote::Host;
use itertools::Itertools;
use thiserror::Error;

/// The failure classes callers can tell apart. Every variant keeps the underlying error chain as
/// its source, so `{:#}` formatting still shows the full story.
#[derive(Debug, Error)]
pub(crate) enum LifecycleError {
    #[error("failed to load kubeadm config")]
    ConfigLoad(#[source] anyhow::Error),

    #[error("failed to merge kubeadm config")]
    ConfigMerge(#[source] anyhow::Error),

    #[error("unsupported kubernetes version {version:?}")]
    UnsupportedVersion { version: String },

    #[error("failed to apply patches to {target}")]
    PatchApply {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to issue bootstrap token")]
    TokenIssue(#[source] anyhow::Error),

    #[error("failed to generate certificates")]
    CertGeneration(#[source] anyhow::Error),

    #[error("remote execution on {host} failed")]
    RemoteExec {
        host: Host,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    PartialFailure(#[from] PartialFailureError),
}

pub(crate) struct HostFailure {
    pub(crate) host: Host,
    pub(crate) error: anyhow::Error,
}

impl std::fmt::Debug for HostFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:#}", self.host, self.error)
    }
}

/// Aggregate of per-host failures from a best-effort fan-out.
#[derive(Debug)]
pub(crate) struct PartialFailureError {
    pub(crate) attempted: usize,
    pub(crate) failures: Vec<HostFailure>,
}

impl PartialFailureError {
    pub(crate) fn all_failed(&self) -> bool {
        self.failures.len() == self.attempted
    }

    pub(crate) fn failed_hosts(&self) -> Vec<&Host> {
        self.failures.iter().map(|failure| &failure.host).collect()
    }
}

impl std::fmt::Display for PartialFailureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} hosts failed: {}",
            self.failures.len(),
            self.attempted,
            self.failures
                .iter()
                .map(|failure| format!("[{}: {:#}]", failure.host, failure.error))
                .join(", ")
        )
    }
}

impl std::error::Error for PartialFailureError {}
