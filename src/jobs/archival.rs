//! Retention enforcement and tenant archival.
//!
//! Phase 1 removes files past retention (blob first, then record, then
//! audit). Phase 2 archives tenants suspended longer than the archive
//! window. Items are independent; one failure never stops the rest.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::lease::{JobLeaseStore, JobOutcome, run_exclusive};
use super::scheduler::ScheduledJob;
use crate::error::Result;
use crate::files::{FilePurger, StoredFile};
use crate::lifecycle::LifecycleEngine;
use crate::retention::RetentionScanner;
use crate::tenant::{Tenant, TenantState};

pub const ARCHIVAL_JOB: &str = "archival";

const RETENTION_REASON: &str = "Retention policy expired";
const ARCHIVE_REASON: &str = "Suspended for extended period";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArchivalReport {
    pub files_archived: usize,
    pub files_failed: usize,
    pub tenants_archived: usize,
    /// Tenants that had already moved on (reactivated or archived
    /// concurrently).
    pub tenants_skipped: usize,
    pub tenants_failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemResult {
    Done,
    Skipped,
    Failed,
    Cancelled,
}

pub struct ArchivalJob {
    scanner: Arc<RetentionScanner>,
    purger: FilePurger,
    engine: Arc<LifecycleEngine>,
    leases: Arc<dyn JobLeaseStore>,
    shutdown: Option<watch::Receiver<bool>>,
    interval: Duration,
}

impl ArchivalJob {
    pub fn new(
        scanner: Arc<RetentionScanner>,
        purger: FilePurger,
        engine: Arc<LifecycleEngine>,
        leases: Arc<dyn JobLeaseStore>,
    ) -> Self {
        Self {
            scanner,
            purger,
            engine,
            leases,
            shutdown: None,
            interval: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Stop picking up new items once `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// How often the scheduler runs this job (default daily). A zero
    /// interval is ignored.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            warn!(target: "taxflow::jobs::archival", "Ignoring zero job interval");
        } else {
            self.interval = interval;
        }
        self
    }

    /// Run both phases, unless another invocation is already running.
    ///
    /// # Errors
    ///
    /// Only a failed scan aborts the run. Per-item failures are counted in
    /// the report.
    #[instrument(skip(self), fields(job = ARCHIVAL_JOB))]
    pub async fn run(&self) -> Result<JobOutcome<ArchivalReport>> {
        let config = self.engine.config();
        run_exclusive(self.leases.as_ref(), ARCHIVAL_JOB, config.job_lease(), self.run_phases()).await
    }

    async fn run_phases(&self) -> Result<ArchivalReport> {
        let config = self.engine.config();
        let now = self.engine.clock().now();
        let concurrency = config.job_concurrency;
        let mut report = ArchivalReport::default();

        info!(target: "taxflow::jobs::archival", phase = "files", "Starting retention sweep");
        let files = self.scanner.files_past_retention(now).await?;
        let results: Vec<ItemResult> = stream::iter(files)
            .map(|file| self.archive_file(file, now))
            .buffer_unordered(concurrency)
            .collect()
            .await;
        for result in results {
            match result {
                ItemResult::Done => report.files_archived += 1,
                ItemResult::Failed => report.files_failed += 1,
                ItemResult::Skipped | ItemResult::Cancelled => {}
            }
        }

        if self.stopping() {
            warn!(target: "taxflow::jobs::archival", "Shutdown requested, stopping after file phase");
            return Ok(report);
        }

        info!(target: "taxflow::jobs::archival", phase = "tenants", "Starting tenant archival");
        let tenants = self
            .scanner
            .tenants_past_suspension(now, config.suspension_to_archive_days)
            .await?;
        let results: Vec<ItemResult> = stream::iter(tenants)
            .map(|tenant| self.archive_tenant(tenant))
            .buffer_unordered(concurrency)
            .collect()
            .await;
        for result in results {
            match result {
                ItemResult::Done => report.tenants_archived += 1,
                ItemResult::Skipped => report.tenants_skipped += 1,
                ItemResult::Failed => report.tenants_failed += 1,
                ItemResult::Cancelled => {}
            }
        }

        info!(
            target: "taxflow::jobs::archival",
            files_archived = report.files_archived,
            files_failed = report.files_failed,
            tenants_archived = report.tenants_archived,
            tenants_skipped = report.tenants_skipped,
            tenants_failed = report.tenants_failed,
            "Archival run completed"
        );

        Ok(report)
    }

    async fn archive_file(&self, file: StoredFile, now: chrono::DateTime<chrono::Utc>) -> ItemResult {
        if self.stopping() {
            return ItemResult::Cancelled;
        }

        match self.purger.purge(&file, now, RETENTION_REASON, None).await {
            Ok(true) => {
                info!(
                    target: "taxflow::jobs::archival",
                    phase = "files",
                    file_id = %file.id,
                    tenant_id = %file.tenant_id,
                    "Expired file archived"
                );
                ItemResult::Done
            }
            Ok(false) => ItemResult::Skipped,
            Err(e) => {
                error!(
                    target: "taxflow::jobs::archival",
                    phase = "files",
                    file_id = %file.id,
                    tenant_id = %file.tenant_id,
                    key = %file.key,
                    error = %e,
                    "Failed to archive expired file"
                );
                ItemResult::Failed
            }
        }
    }

    async fn archive_tenant(&self, tenant: Tenant) -> ItemResult {
        if self.stopping() {
            return ItemResult::Cancelled;
        }

        match self
            .engine
            .transition_observed(&tenant, TenantState::Archived, ARCHIVE_REASON, None)
            .await
        {
            Ok(_) => ItemResult::Done,
            Err(e) if e.is_rejected_transition() => {
                warn!(
                    target: "taxflow::jobs::archival",
                    phase = "tenants",
                    tenant_id = %tenant.id,
                    error = %e,
                    "Tenant changed since scan, not archived"
                );
                ItemResult::Skipped
            }
            Err(e) => {
                error!(
                    target: "taxflow::jobs::archival",
                    phase = "tenants",
                    tenant_id = %tenant.id,
                    error = %e,
                    "Failed to archive tenant"
                );
                ItemResult::Failed
            }
        }
    }

    fn stopping(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

#[async_trait]
impl ScheduledJob for ArchivalJob {
    fn name(&self) -> &str {
        ARCHIVAL_JOB
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> Result<()> {
        self.run().await.map(|_| ())
    }
}
