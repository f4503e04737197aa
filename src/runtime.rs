use anyhow::{bail, Context, Result};

/// Raise the soft open files limit to the hard one
pub(crate) fn raise_open_files_limit() -> Result<()> {
    let mut current_limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut current_limit) } != 0 {
        bail!("Failed to get current max open files limit");
    }

    if current_limit.rlim_cur == current_limit.rlim_max {
        log::debug!("max open files already at the hard limit {}", current_limit.rlim_max);
        return Ok(());
    }

    log::debug!(
        "raising max open files soft limit from {} to {}",
        current_limit.rlim_cur,
        current_limit.rlim_max
    );

    let new_limit = libc::rlimit {
        rlim_cur: current_limit.rlim_max,
        rlim_max: current_limit.rlim_max,
    };

    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &new_limit) } != 0 {
        bail!("Failed to set max open files limit");
    }

    Ok(())
}

pub(crate) fn prepare_tokio_runtime(threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    // Every fan-out worker holds an ssh subprocess with three pipes
    raise_open_files_limit().context("Setting open file limits to max")?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(threads) = threads {
        builder.worker_threads(threads);
    }

    builder.enable_all().build().context("building tokio runtime")
}
