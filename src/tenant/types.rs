use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TenantState;

/// A tax-practice firm using the platform.
///
/// `state` and the lifecycle timestamps are only ever changed by the
/// lifecycle engine. `version` increases by one on every successful write
/// and is what concurrent writers race on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    /// Contact address for lifecycle notifications.
    pub email: String,
    pub state: TenantState,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub grace_period_started_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub billing: BillingLinkage,
    pub quotas: TenantQuotas,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Link between a tenant and the payment processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingLinkage {
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    /// Processor-side status string, recorded as received.
    pub subscription_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantQuotas {
    pub max_clients: u32,
    pub max_storage_gb: u32,
}

impl Default for TenantQuotas {
    fn default() -> Self {
        Self {
            max_clients: 10,
            max_storage_gb: 10,
        }
    }
}

/// Signup input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub stripe_customer_id: Option<String>,
    #[serde(default)]
    pub quotas: TenantQuotas,
}

impl NewTenant {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            stripe_customer_id: None,
            quotas: TenantQuotas::default(),
        }
    }

    #[must_use]
    pub fn with_customer_id(mut self, customer_id: impl Into<String>) -> Self {
        self.stripe_customer_id = Some(customer_id.into());
        self
    }

    #[must_use]
    pub fn with_quotas(mut self, quotas: TenantQuotas) -> Self {
        self.quotas = quotas;
        self
    }
}

impl Tenant {
    /// Apply `target` and its timestamp side effects.
    ///
    /// Does not check legality; callers go through the transition table first.
    pub(crate) fn enter_state(&mut self, target: TenantState, now: DateTime<Utc>) {
        match target {
            TenantState::GracePeriod => self.grace_period_started_at = Some(now),
            TenantState::Suspended => self.suspended_at = Some(now),
            TenantState::Archived => self.archived_at = Some(now),
            TenantState::Active => self.grace_period_started_at = None,
            TenantState::Trial => {}
        }
        self.state = target;
        self.updated_at = now;
    }

    /// When the tenant entered its current state, if that is recorded.
    #[must_use]
    pub fn entered_state_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            TenantState::Trial => Some(self.created_at),
            TenantState::Active => None,
            TenantState::GracePeriod => self.grace_period_started_at,
            TenantState::Suspended => self.suspended_at,
            TenantState::Archived => self.archived_at,
        }
    }

    pub fn customer_id(&self) -> Option<&str> {
        self.billing.stripe_customer_id.as_deref()
    }
}

/// Narrows a `find_by_state` query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TenantFilter {
    /// Only tenants that entered their current state at or before this
    /// instant. Tenants without a recorded entry time never match.
    pub entered_at_or_before: Option<DateTime<Utc>>,
}

impl TenantFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn entered_at_or_before(cutoff: DateTime<Utc>) -> Self {
        Self {
            entered_at_or_before: Some(cutoff),
        }
    }

    pub fn matches(&self, tenant: &Tenant) -> bool {
        match self.entered_at_or_before {
            None => true,
            Some(cutoff) => tenant.entered_state_at().is_some_and(|at| at <= cutoff),
        }
    }
}
