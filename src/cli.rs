use clap::{Parser, Subcommand};
use clio::ClioPath;

/// Bring kubeadm clusters up, grow, shrink, upgrade and tear them down over SSH
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// YAML file describing the cluster, the SSH settings and the kubeadm customizations
    #[clap(long, env = "KUBEADM_LIFECYCLE_CONFIG", value_parser = clap::value_parser!(ClioPath).exists().is_file())]
    pub(crate) config: ClioPath,

    /// Overrides log_level from the config file. One of off, error, warn, info, debug, trace
    #[clap(long)]
    pub(crate) log_level: Option<log::LevelFilter>,

    /// Overrides summary_file from the config file
    #[clap(long)]
    pub(crate) summary_file: Option<ClioPath>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Clone, Debug, Subcommand, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum Command {
    /// Initialize the first master, then join every other declared master and node
    Init,

    /// Join additional control plane nodes. The hosts must be declared as masters in the config
    JoinMasters {
        #[clap(long = "host", required = true)]
        hosts: Vec<String>,
    },

    /// Join additional worker nodes. The hosts must be declared as nodes in the config
    JoinNodes {
        #[clap(long = "host", required = true)]
        hosts: Vec<String>,
    },

    /// Remove control plane nodes from the cluster and reset them
    DeleteMasters {
        #[clap(long = "host", required = true)]
        hosts: Vec<String>,
    },

    /// Remove worker nodes from the cluster and reset them
    DeleteNodes {
        #[clap(long = "host", required = true)]
        hosts: Vec<String>,
    },

    /// Reset every declared host, workers first
    Reset,

    /// Upgrade every declared host to a newer kubernetes version, master0 first
    Upgrade {
        /// Target kubernetes version, e.g. v1.26.3
        #[clap(long)]
        version: String,
    },

    /// Rewrite the lvscare manifest and IPVS rules on every worker node
    SyncIpvs,
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::Init => "init",
            Command::JoinMasters { .. } => "join-masters",
            Command::JoinNodes { .. } => "join-nodes",
            Command::DeleteMasters { .. } => "delete-masters",
            Command::DeleteNodes { .. } => "delete-nodes",
            Command::Reset => "reset",
            Command::Upgrade { .. } => "upgrade",
            Command::SyncIpvs => "sync-ipvs",
        }
    }
}
