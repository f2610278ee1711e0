//! Grace-period escalation and warnings.
//!
//! Escalation suspends tenants whose grace window has run out. Warnings
//! email tenants a few days before that happens and change nothing.

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
use crate::lifecycle::LifecycleEngine;
use crate::notify::{Notification, NotificationKind, Notifier, send_best_effort};
use crate::retention::{GraceWarning, RetentionScanner};
use crate::tenant::{Tenant, TenantState};

/// Lease shared by every entry point, so escalation and warnings never run
/// alongside each other or a combined run.
pub const GRACE_PERIOD_JOB: &str = "grace_period";

const SUSPEND_REASON: &str = "Grace period expired";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GracePeriodReport {
    pub suspended: usize,
    /// Tenants that paid or changed state after the scan.
    pub suspension_skipped: usize,
    pub failed: usize,
    pub warned: usize,
    pub warnings_failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escalation {
    Suspended,
    Skipped,
    Failed,
    Cancelled,
}

pub struct GracePeriodJob {
    scanner: Arc<RetentionScanner>,
    engine: Arc<LifecycleEngine>,
    notifier: Arc<dyn Notifier>,
    leases: Arc<dyn JobLeaseStore>,
    shutdown: Option<watch::Receiver<bool>>,
    interval: Duration,
}

impl GracePeriodJob {
    pub fn new(
        scanner: Arc<RetentionScanner>,
        engine: Arc<LifecycleEngine>,
        notifier: Arc<dyn Notifier>,
        leases: Arc<dyn JobLeaseStore>,
    ) -> Self {
        Self {
            scanner,
            engine,
            notifier,
            leases,
            shutdown: None,
            interval: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// How often the scheduler runs this job (default daily). A zero
    /// interval is ignored.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            warn!(target: "taxflow::jobs::grace_period", "Ignoring zero job interval");
        } else {
            self.interval = interval;
        }
        self
    }

    /// Escalation then warnings, under one lease.
    #[instrument(skip(self), fields(job = GRACE_PERIOD_JOB))]
    pub async fn run(&self) -> Result<JobOutcome<GracePeriodReport>> {
        run_exclusive(self.leases.as_ref(), GRACE_PERIOD_JOB, self.engine.config().job_lease(), async {
            let mut report = self.escalate().await?;
            if self.stopping() {
                return Ok(report);
            }
            let warnings = self.warn().await?;
            report.warned = warnings.warned;
            report.warnings_failed = warnings.warnings_failed;
            Ok(report)
        })
        .await
    }

    /// Suspend tenants past their grace window.
    #[instrument(skip(self), fields(job = GRACE_PERIOD_JOB, phase = "escalation"))]
    pub async fn run_escalation(&self) -> Result<JobOutcome<GracePeriodReport>> {
        run_exclusive(
            self.leases.as_ref(),
            GRACE_PERIOD_JOB,
            self.engine.config().job_lease(),
            self.escalate(),
        )
        .await
    }

    /// Warn tenants nearing the end of their grace window.
    #[instrument(skip(self), fields(job = GRACE_PERIOD_JOB, phase = "warnings"))]
    pub async fn run_warnings(&self) -> Result<JobOutcome<GracePeriodReport>> {
        run_exclusive(
            self.leases.as_ref(),
            GRACE_PERIOD_JOB,
            self.engine.config().job_lease(),
            self.warn(),
        )
        .await
    }

    async fn escalate(&self) -> Result<GracePeriodReport> {
        let config = self.engine.config();
        let now = self.engine.clock().now();

        let expired = self
            .scanner
            .tenants_past_grace_period(now, config.grace_period_days)
            .await?;

        let results: Vec<Escalation> = stream::iter(expired)
            .map(|tenant| self.suspend(tenant))
            .buffer_unordered(config.job_concurrency)
            .collect()
            .await;

        let mut report = GracePeriodReport::default();
        for result in results {
            match result {
                Escalation::Suspended => report.suspended += 1,
                Escalation::Skipped => report.suspension_skipped += 1,
                Escalation::Failed => report.failed += 1,
                Escalation::Cancelled => {}
            }
        }

        info!(
            target: "taxflow::jobs::grace_period",
            phase = "escalation",
            suspended = report.suspended,
            skipped = report.suspension_skipped,
            failed = report.failed,
            "Grace period escalation completed"
        );

        Ok(report)
    }

    async fn suspend(&self, tenant: Tenant) -> Escalation {
        if self.stopping() {
            return Escalation::Cancelled;
        }

        match self
            .engine
            .transition_observed(&tenant, TenantState::Suspended, SUSPEND_REASON, None)
            .await
        {
            Ok(suspended) => {
                let notice = Notification::for_tenant(NotificationKind::SuspensionNotice, &suspended);
                if !send_best_effort(self.notifier.as_ref(), &notice, self.engine.config().operation_timeout()).await {
                    warn!(
                        target: "taxflow::jobs::grace_period",
                        tenant_id = %suspended.id,
                        "Suspension notice not delivered"
                    );
                }
                Escalation::Suspended
            }
            Err(e) if e.is_rejected_transition() => {
                warn!(
                    target: "taxflow::jobs::grace_period",
                    phase = "escalation",
                    tenant_id = %tenant.id,
                    error = %e,
                    "Tenant changed since scan, not suspended"
                );
                Escalation::Skipped
            }
            Err(e) => {
                error!(
                    target: "taxflow::jobs::grace_period",
                    phase = "escalation",
                    tenant_id = %tenant.id,
                    error = %e,
                    "Failed to suspend tenant"
                );
                Escalation::Failed
            }
        }
    }

    async fn warn(&self) -> Result<GracePeriodReport> {
        let config = self.engine.config();
        let now = self.engine.clock().now();

        let nearing = self
            .scanner
            .tenants_nearing_grace_expiry(now, config.grace_period_days, config.grace_warning_days)
            .await?;

        let results: Vec<Option<bool>> = stream::iter(nearing)
            .map(|warning| self.send_warning(warning))
            .buffer_unordered(config.job_concurrency)
            .collect()
            .await;

        let mut report = GracePeriodReport::default();
        for sent in results.into_iter().flatten() {
            if sent {
                report.warned += 1;
            } else {
                report.warnings_failed += 1;
            }
        }

        info!(
            target: "taxflow::jobs::grace_period",
            phase = "warnings",
            warned = report.warned,
            failed = report.warnings_failed,
            "Grace period warnings completed"
        );

        Ok(report)
    }

    /// `None` if cancelled before sending.
    async fn send_warning(&self, warning: GraceWarning) -> Option<bool> {
        if self.stopping() {
            return None;
        }

        let notification = Notification::for_tenant(
            NotificationKind::GracePeriodWarning {
                days_remaining: warning.days_remaining,
            },
            &warning.tenant,
        );
        let sent = send_best_effort(
            self.notifier.as_ref(),
            &notification,
            self.engine.config().operation_timeout(),
        )
        .await;

        if sent {
            info!(
                target: "taxflow::jobs::grace_period",
                phase = "warnings",
                tenant_id = %warning.tenant.id,
                days_remaining = warning.days_remaining,
                "Grace period warning sent"
            );
        } else {
            error!(
                target: "taxflow::jobs::grace_period",
                phase = "warnings",
                tenant_id = %warning.tenant.id,
                days_remaining = warning.days_remaining,
                "Grace period warning not delivered"
            );
        }
        Some(sent)
    }

    fn stopping(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

#[async_trait]
impl ScheduledJob for GracePeriodJob {
    fn name(&self) -> &str {
        GRACE_PERIOD_JOB
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> Result<()> {
        self.run().await.map(|_| ())
    }
}
