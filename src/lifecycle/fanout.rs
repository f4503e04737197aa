//! Running one step on many hosts at once. Init and join flows stop at the first failure,
//! delete and reset flows try every host and report the failures together.

use crate::{
    error::{HostFailure, LifecycleError, PartialFailureError},
    remote::Host,
};
use anyhow::{Context, Result};
use futures_util::future::{join_all, try_join_all};
use itertools::Itertools;
use std::future::Future;

/// Run `step` on every host concurrently, the first error wins
pub(crate) async fn fail_fast<'a, T, F, Fut>(step: &str, hosts: &'a [Host], run: F) -> Result<Vec<T>>
where
    F: Fn(&'a Host) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    try_join_all(hosts.iter().map(|host| {
        let step_future = run(host);
        async move { step_future.await.with_context(|| format!("{} {} failed", step, host)) }
    }))
    .await
}

/// Outcome of a best-effort fan-out that did not fail on every host
#[derive(Debug)]
pub(crate) struct FanOutReport {
    pub(crate) succeeded: Vec<Host>,
    pub(crate) failed: Option<PartialFailureError>,
}

impl FanOutReport {
    pub(crate) fn empty() -> Self {
        Self {
            succeeded: vec![],
            failed: None,
        }
    }

    /// Turn per-host outcomes into a report, or an error when nothing succeeded
    pub(crate) fn collect(step: &str, outcomes: Vec<(Host, Result<()>)>) -> Result<Self> {
        let attempted = outcomes.len();
        let mut succeeded = vec![];
        let mut failures = vec![];

        for (host, outcome) in outcomes {
            match outcome {
                Ok(()) => succeeded.push(host),
                Err(error) => {
                    log::warn!("{} {} failed: {:#}", step, host, error);
                    failures.push(HostFailure { host, error });
                }
            }
        }

        let failed = (!failures.is_empty()).then_some(PartialFailureError { attempted, failures });

        match failed {
            Some(failed) if failed.all_failed() => {
                Err(anyhow::Error::from(LifecycleError::PartialFailure(failed)).context(format!("{} failed on every host", step)))
            }
            failed => Ok(Self { succeeded, failed }),
        }
    }

    /// Log who made it and hand back who didn't
    pub(crate) fn into_failed(self, step: &str) -> Option<PartialFailureError> {
        if !self.succeeded.is_empty() {
            log::info!("{} done on {}", step, self.succeeded.iter().join(", "));
        }
        if let Some(failed) = &self.failed {
            log::warn!("{} failed on {}", step, failed.failed_hosts().iter().join(", "));
        }
        self.failed
    }
}

/// Run `step` on every host concurrently and keep going past failures
pub(crate) async fn best_effort<'a, F, Fut>(step: &str, hosts: &'a [Host], run: F) -> Result<FanOutReport>
where
    F: Fn(&'a Host) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if hosts.is_empty() {
        return Ok(FanOutReport::empty());
    }

    let outcomes = join_all(hosts.iter().map(|host| {
        let step_future = run(host);
        async move { (host.clone(), step_future.await) }
    }))
    .await;

    FanOutReport::collect(step, outcomes)
}
