use anyhow::{Context, Result};
use clap::Parser;
use config::LifecycleConfig;
use kubeadm::registry::TypeRegistry;
use lifecycle::Lifecycle;

mod cli;
mod config;
mod error;
mod file_utils;
mod kube_client;
mod kubeadm;
mod lifecycle;
mod logging;
mod net_utils;
mod pki;
mod remote;
mod runtime;
mod template;
mod token;
mod version;

#[cfg(test)]
mod tests;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let config = LifecycleConfig::load(&cli).context("loading config")?;

    logging::init(config.log_level).context("initializing logging")?;

    let runtime = runtime::prepare_tokio_runtime(config.threads)?;
    runtime.block_on(main_internal(&config, &cli.command))
}

async fn main_internal(config: &LifecycleConfig, command: &cli::Command) -> Result<()> {
    let registry = TypeRegistry::new();
    let lifecycle = Lifecycle::connect(config, &registry, command).context("connecting to the cluster")?;

    log::info!("running {}", command.name());

    let result = lifecycle
        .execute(command)
        .await
        .with_context(|| format!("{} failed", command.name()));

    if let Ok(Some(failed)) = &result {
        log::warn!("{} finished with failures, {}", command.name(), failed);
    }

    logging::generate_summary(config, command, lifecycle.timings(), result.as_ref().err()).context("writing summary")?;

    result.map(|_| ())
}
