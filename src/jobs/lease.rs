//! Non-overlap of job invocations.
//!
//! A job runs only while it holds the lease named after it. A second
//! invocation that finds the lease held is skipped, not queued.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::Result;

/// Named, expiring leases shared by every instance that runs jobs.
///
/// A multi-instance deployment needs a shared backend, e.g. a row per job
/// updated with
///
/// ```sql
/// UPDATE job_leases SET holder = $2, expires_at = now() + $3
/// WHERE job = $1 AND (holder = $2 OR expires_at < now())
/// ```
#[async_trait]
pub trait JobLeaseStore: Send + Sync {
    /// Take the lease for `job` unless another holder has an unexpired one.
    ///
    /// The current holder calling again extends its lease to `ttl` from now;
    /// [`run_exclusive`] relies on this to renew.
    async fn try_acquire(&self, job: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Give the lease back. Releasing a lease held by someone else is a no-op.
    async fn release(&self, job: &str, holder: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    expires_at: Instant,
}

/// Process-local leases (for development/testing and single-instance
/// deployments)
#[derive(Clone, Default)]
pub struct InMemoryLeaseStore {
    leases: Arc<Mutex<HashMap<String, Lease>>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn holder(&self, job: &str) -> Option<String> {
        let leases = self.leases.lock().await;
        leases
            .get(job)
            .filter(|l| l.expires_at > Instant::now())
            .map(|l| l.holder.clone())
    }
}

#[async_trait]
impl JobLeaseStore for InMemoryLeaseStore {
    async fn try_acquire(&self, job: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();

        if let Some(existing) = leases.get(job) {
            if existing.expires_at > now && existing.holder != holder {
                return Ok(false);
            }
        }

        leases.insert(
            job.to_string(),
            Lease {
                holder: holder.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, job: &str, holder: &str) -> Result<()> {
        let mut leases = self.leases.lock().await;
        if leases.get(job).is_some_and(|l| l.holder == holder) {
            leases.remove(job);
        }
        Ok(())
    }
}

/// Result of an invocation that may have been skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome<T> {
    Completed(T),
    /// Another invocation held the lease.
    Skipped,
}

impl<T> JobOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Skipped => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// Floor for the renewal period, so a tiny `ttl` doesn't spin.
const MIN_RENEWAL_PERIOD: Duration = Duration::from_millis(100);

/// Run `work` while holding the lease for `job`.
///
/// The lease is renewed every `ttl / 2` for as long as `work` runs, so a
/// run that outlasts `ttl` still excludes later invocations. It is
/// released whether `work` succeeds or fails. If it can't be released it
/// simply expires after `ttl`.
///
/// # Errors
///
/// Returns the lease store's error if the lease can't be taken, otherwise
/// whatever `work` returns.
pub async fn run_exclusive<T, F>(
    leases: &dyn JobLeaseStore,
    job: &str,
    ttl: Duration,
    work: F,
) -> Result<JobOutcome<T>>
where
    F: Future<Output = Result<T>>,
{
    let holder = uuid::Uuid::new_v4().to_string();

    if !leases.try_acquire(job, &holder, ttl).await? {
        tracing::info!(target: "taxflow::jobs", job, "Previous run still in progress, skipping");
        return Ok(JobOutcome::Skipped);
    }

    let period = (ttl / 2).max(MIN_RENEWAL_PERIOD);
    let mut renewal = tokio::time::interval_at(Instant::now() + period, period);
    renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(work);

    let result = loop {
        tokio::select! {
            result = &mut work => break result,
            _ = renewal.tick() => match leases.try_acquire(job, &holder, ttl).await {
                Ok(true) => tracing::trace!(target: "taxflow::jobs", job, "Job lease renewed"),
                Ok(false) => tracing::warn!(
                    target: "taxflow::jobs",
                    job,
                    "Job lease lost to another holder while running"
                ),
                Err(e) => tracing::warn!(target: "taxflow::jobs", job, error = %e, "Failed to renew job lease"),
            },
        }
    };

    if let Err(e) = leases.release(job, &holder).await {
        tracing::warn!(target: "taxflow::jobs", job, error = %e, "Failed to release job lease");
    }

    result.map(JobOutcome::Completed)
}
