use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::files::StoredFile;
use crate::storage::{FileStore, TenantStore};
use crate::tenant::{Tenant, TenantFilter, TenantState};
use crate::utils::with_timeout;

/// A grace-period tenant close enough to suspension to be warned.
#[derive(Debug, Clone, PartialEq)]
pub struct GraceWarning {
    pub tenant: Tenant,
    pub days_remaining: u32,
}

/// Whole days left before a grace period that started at `started_at` runs
/// out. Zero or negative once it has.
pub fn days_remaining(started_at: DateTime<Utc>, now: DateTime<Utc>, grace_days: u32) -> i64 {
    let elapsed_days = (now - started_at).num_seconds().div_euclid(86_400);
    i64::from(grace_days) - elapsed_days
}

/// Finds files past retention and tenants past their grace or suspension
/// windows. Never writes.
pub struct RetentionScanner {
    tenants: Arc<dyn TenantStore>,
    files: Arc<dyn FileStore>,
    timeout: std::time::Duration,
}

impl RetentionScanner {
    pub fn new(tenants: Arc<dyn TenantStore>, files: Arc<dyn FileStore>, timeout: std::time::Duration) -> Self {
        Self {
            tenants,
            files,
            timeout,
        }
    }

    /// Live files with `expires_at <= now`.
    pub async fn files_past_retention(&self, now: DateTime<Utc>) -> Result<Vec<StoredFile>> {
        with_timeout(self.timeout, "file_store.find_expired", self.files.find_expired(now)).await
    }

    /// GRACE_PERIOD tenants whose grace started at least `grace_days` ago.
    pub async fn tenants_past_grace_period(&self, now: DateTime<Utc>, grace_days: u32) -> Result<Vec<Tenant>> {
        self.entered_before(TenantState::GracePeriod, now - Duration::days(i64::from(grace_days)))
            .await
    }

    /// SUSPENDED tenants suspended at least `suspension_days` ago.
    pub async fn tenants_past_suspension(&self, now: DateTime<Utc>, suspension_days: u32) -> Result<Vec<Tenant>> {
        self.entered_before(TenantState::Suspended, now - Duration::days(i64::from(suspension_days)))
            .await
    }

    /// GRACE_PERIOD tenants with between 1 and `warn_days` whole days left.
    pub async fn tenants_nearing_grace_expiry(
        &self,
        now: DateTime<Utc>,
        grace_days: u32,
        warn_days: u32,
    ) -> Result<Vec<GraceWarning>> {
        let in_grace = with_timeout(
            self.timeout,
            "tenant_store.find_by_state",
            self.tenants.find_by_state(TenantState::GracePeriod, TenantFilter::all()),
        )
        .await?;

        Ok(in_grace
            .into_iter()
            .filter_map(|tenant| {
                let started = tenant.grace_period_started_at?;
                let remaining = days_remaining(started, now, grace_days);
                if remaining > 0 && remaining <= i64::from(warn_days) {
                    Some(GraceWarning {
                        days_remaining: u32::try_from(remaining).ok()?,
                        tenant,
                    })
                } else {
                    None
                }
            })
            .collect())
    }

    async fn entered_before(&self, state: TenantState, cutoff: DateTime<Utc>) -> Result<Vec<Tenant>> {
        with_timeout(
            self.timeout,
            "tenant_store.find_by_state",
            self.tenants
                .find_by_state(state, TenantFilter::entered_at_or_before(cutoff)),
        )
        .await
    }
}
