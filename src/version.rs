use crate::{error::LifecycleError, token::Token};
use anyhow::{ensure, Context, Result};
use itertools::Itertools;
use lazy_regex::regex_captures;
use strum_macros::{Display, EnumString};

pub(crate) const V1_13_0: &str = "v1.13.0";
pub(crate) const V1_15_0: &str = "v1.15.0";
pub(crate) const V1_19_0: &str = "v1.19.0";
pub(crate) const V1_20_0: &str = "v1.20.0";
pub(crate) const V1_22_0: &str = "v1.22.0";
pub(crate) const V1_27_0: &str = "v1.27.0";

const IGNORE_PREFLIGHT_ERRORS: &str = "--ignore-preflight-errors=SystemVerification";

/// A numeric major.minor.patch triplet. Pre-release and build suffixes are dropped on parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct KubeVersion {
    major: u64,
    minor: u64,
    patch: u64,
}

impl KubeVersion {
    pub(crate) fn parse(version: &str) -> Option<Self> {
        let (_, major, minor, patch) = regex_captures!(r"^v?(\d+)\.(\d+)\.(\d+)(?:[-+].*)?$", version.trim())?;

        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
            patch: patch.parse().ok()?,
        })
    }
}

impl std::fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Returns whether `version` >= `than`. Anything that doesn't parse as exactly three numeric
/// components compares as "not greater".
pub(crate) fn compare(version: &str, than: &str) -> bool {
    match (KubeVersion::parse(version), KubeVersion::parse(than)) {
        (Some(version), Some(than)) => version >= than,
        _ => false,
    }
}

/// kubeadm API generations, in release order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, serde::Serialize)]
pub(crate) enum KubeadmApiVersion {
    #[strum(serialize = "kubeadm.k8s.io/v1beta1")]
    #[serde(rename = "kubeadm.k8s.io/v1beta1")]
    V1beta1,
    #[strum(serialize = "kubeadm.k8s.io/v1beta2")]
    #[serde(rename = "kubeadm.k8s.io/v1beta2")]
    V1beta2,
    #[strum(serialize = "kubeadm.k8s.io/v1beta3")]
    #[serde(rename = "kubeadm.k8s.io/v1beta3")]
    V1beta3,
}

impl KubeadmApiVersion {
    pub(crate) fn version(self) -> &'static str {
        match self {
            Self::V1beta1 => "v1beta1",
            Self::V1beta2 => "v1beta2",
            Self::V1beta3 => "v1beta3",
        }
    }
}

pub(crate) fn resolve_api_version(kube_version: &str) -> Result<KubeadmApiVersion> {
    let unsupported = || LifecycleError::UnsupportedVersion {
        version: kube_version.to_string(),
    };

    KubeVersion::parse(kube_version).ok_or_else(unsupported)?;

    Ok(if compare(kube_version, V1_22_0) {
        KubeadmApiVersion::V1beta3
    } else if compare(kube_version, V1_15_0) {
        KubeadmApiVersion::V1beta2
    } else if compare(kube_version, V1_13_0) {
        KubeadmApiVersion::V1beta1
    } else {
        return Err(unsupported().into());
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub(crate) enum CommandKind {
    InitMaster,
    JoinMaster,
    JoinNode,
    UpdateCluster,
}

/// Everything a kubeadm invocation may need to embed
pub(crate) struct CommandArgs<'a> {
    pub(crate) config_path: &'a str,
    pub(crate) master0_endpoint: &'a str,
    pub(crate) vip_endpoint: &'a str,
    pub(crate) token: Option<&'a Token>,
    pub(crate) verbosity: u8,
}

pub(crate) fn resolve_command(kube_version: &str, kind: CommandKind, args: &CommandArgs) -> Result<String> {
    resolve_api_version(kube_version)?;

    let base = if compare(kube_version, V1_15_0) {
        match kind {
            CommandKind::InitMaster => format!(
                "kubeadm init --config={} --upload-certs --skip-certificate-key-print --skip-token-print",
                args.config_path
            ),
            CommandKind::JoinMaster | CommandKind::JoinNode => format!("kubeadm join --config={}", args.config_path),
            CommandKind::UpdateCluster => format!("kubeadm init phase upload-config kubeadm --config={}", args.config_path),
        }
    } else {
        legacy_command(kind, args).with_context(|| format!("building legacy {} command", kind))?
    };

    Ok(match kind {
        CommandKind::InitMaster | CommandKind::JoinMaster => {
            format!("{} {} -v {}", base, IGNORE_PREFLIGHT_ERRORS, args.verbosity)
        }
        CommandKind::JoinNode | CommandKind::UpdateCluster => format!("{} -v {}", base, args.verbosity),
    })
}

// Before v1.15 kubeadm join could not take credentials from a config file
fn legacy_command(kind: CommandKind, args: &CommandArgs) -> Result<String> {
    Ok(match kind {
        CommandKind::InitMaster => format!("kubeadm init --config={} --experimental-upload-certs", args.config_path),
        CommandKind::JoinMaster => {
            let token = args.token.context("join token required")?;
            ensure!(!token.certificate_key.is_empty(), "certificate key required");

            format!(
                "kubeadm join {} --token {} {} --experimental-control-plane --certificate-key {}",
                args.master0_endpoint,
                token.join_token,
                discovery_hash_flags(token)?,
                token.certificate_key
            )
        }
        CommandKind::JoinNode => {
            let token = args.token.context("join token required")?;

            format!(
                "kubeadm join {} --token {} {}",
                args.vip_endpoint,
                token.join_token,
                discovery_hash_flags(token)?
            )
        }
        CommandKind::UpdateCluster => format!("kubeadm config upload from-file --config={}", args.config_path),
    })
}

fn discovery_hash_flags(token: &Token) -> Result<String> {
    ensure!(!token.discovery_token_ca_cert_hash.is_empty(), "discovery token CA cert hash required");

    Ok(token
        .discovery_token_ca_cert_hash
        .iter()
        .map(|hash| format!("--discovery-token-ca-cert-hash {}", hash))
        .join(" "))
}
