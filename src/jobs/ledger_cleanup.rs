//! Pruning of the billing idempotency ledger.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::lease::{JobLeaseStore, JobOutcome, run_exclusive};
use super::scheduler::ScheduledJob;
use crate::billing::{IdempotencyStore, LEDGER_RETENTION_DAYS};
use crate::error::Result;
use crate::lifecycle::LifecycleEngine;
use crate::utils::with_timeout;

pub const LEDGER_CLEANUP_JOB: &str = "ledger_cleanup";

/// Drops ledger entries older than [`LEDGER_RETENTION_DAYS`].
pub struct LedgerCleanupJob {
    ledger: Arc<dyn IdempotencyStore>,
    engine: Arc<LifecycleEngine>,
    leases: Arc<dyn JobLeaseStore>,
    interval: Duration,
}

impl LedgerCleanupJob {
    pub fn new(
        ledger: Arc<dyn IdempotencyStore>,
        engine: Arc<LifecycleEngine>,
        leases: Arc<dyn JobLeaseStore>,
    ) -> Self {
        Self {
            ledger,
            engine,
            leases,
            interval: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Default daily. A zero interval is ignored.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            warn!(target: "taxflow::jobs::ledger_cleanup", "Ignoring zero job interval");
        } else {
            self.interval = interval;
        }
        self
    }

    /// Remove stale entries. Yields how many went.
    #[instrument(skip(self), fields(job = LEDGER_CLEANUP_JOB))]
    pub async fn run(&self) -> Result<JobOutcome<usize>> {
        let config = self.engine.config();
        run_exclusive(self.leases.as_ref(), LEDGER_CLEANUP_JOB, config.job_lease(), async {
            let cutoff = self.engine.clock().now() - ChronoDuration::days(LEDGER_RETENTION_DAYS);
            let removed = with_timeout(
                config.operation_timeout(),
                "idempotency_store.cleanup_old_entries",
                self.ledger.cleanup_old_entries(cutoff),
            )
            .await?;

            info!(target: "taxflow::jobs::ledger_cleanup", removed, %cutoff, "Billing ledger pruned");
            Ok(removed)
        })
        .await
    }
}

#[async_trait]
impl ScheduledJob for LedgerCleanupJob {
    fn name(&self) -> &str {
        LEDGER_CLEANUP_JOB
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> Result<()> {
        self.run().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LifecycleHarness;

    #[tokio::test]
    async fn test_prunes_entries_past_retention() {
        let h = LifecycleHarness::new();
        let now = h.clock.now();
        h.ledger
            .mark_processed("evt_old", now - ChronoDuration::days(LEDGER_RETENTION_DAYS + 1))
            .await
            .unwrap();
        h.ledger
            .mark_processed("evt_recent", now - ChronoDuration::days(2))
            .await
            .unwrap();

        let removed = h.ledger_cleanup_job().run().await.unwrap().completed().unwrap();

        assert_eq!(removed, 1);
        assert!(!h.ledger.is_processed("evt_old").await.unwrap());
        assert!(h.ledger.is_processed("evt_recent").await.unwrap());
    }

    #[tokio::test]
    async fn test_skipped_while_another_instance_prunes() {
        let h = LifecycleHarness::new();
        h.leases
            .try_acquire(LEDGER_CLEANUP_JOB, "other-instance", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(h.ledger_cleanup_job().run().await.unwrap().is_skipped());
    }
}
