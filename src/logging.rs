use crate::{cli::Command, config::LifecycleConfig, lifecycle::timing::StepTiming};
use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use log::{LevelFilter, Metadata, Record};
use std::sync::{Arc, Mutex};

struct LifecycleLogger;

static LOGGER: LifecycleLogger = LifecycleLogger;

pub fn init(level: LevelFilter) -> Result<()> {
    match log::set_logger(&LOGGER) {
        Ok(_) => log::set_max_level(level),
        Err(_) => bail!("Logger initalization failed"),
    };

    Ok(())
}

lazy_static! {
    pub(crate) static ref LOG_RECORDS: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
}

impl log::Log for LifecycleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_string = format!(
                "{} - {} - {}:{}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            );

            {
                let mut log_records = match LOG_RECORDS.lock() {
                    Ok(log_records) => log_records,
                    Err(err) => {
                        println!("Failed to lock log records: {}", err);
                        return;
                    }
                };
                log_records.push(log_string.clone());
            }

            println!("{}", log_string);
        }
    }

    fn flush(&self) {}
}

/// The `-v` level handed to kubeadm, following our own log level
pub(crate) fn kubeadm_verbosity() -> u8 {
    verbosity_for(log::max_level())
}

fn verbosity_for(level: LevelFilter) -> u8 {
    match level {
        LevelFilter::Trace => 9,
        LevelFilter::Debug => 6,
        _ => 0,
    }
}

#[derive(serde::Serialize)]
struct Summary<'a> {
    command: &'a Command,
    lifecycle_config: &'a LifecycleConfig,
    error: Option<String>,
    logs: Vec<String>,
    run_times: Vec<StepTiming>,
}

pub(crate) fn generate_summary(
    lifecycle_config: &LifecycleConfig,
    command: &Command,
    run_times: Vec<StepTiming>,
    error: Option<&anyhow::Error>,
) -> Result<()> {
    let Some(summary_file) = &lifecycle_config.summary_file else {
        return Ok(());
    };

    let logs = match LOG_RECORDS.lock() {
        Ok(logs) => logs.clone(),
        Err(err) => {
            vec![format!("Failed to lock log records: {}", err)]
        }
    };

    let summary = Summary {
        command,
        lifecycle_config,
        error: error.map(|error| format!("{:#}", error)),
        logs,
        run_times,
    };

    let summary_file = summary_file.0.clone().create().context("opening summary file for writing")?;
    serde_yaml::to_writer(summary_file, &summary).context("serializing summary into summary file")?;

    Ok(())
}
