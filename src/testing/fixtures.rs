//! Test fixtures for tenants and files
//!
//! Builders start from sensible defaults so tests only spell out what they
//! care about.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::files::StoredFile;
use crate::tenant::{BillingLinkage, Tenant, TenantQuotas, TenantState};

/// Helper functions for generating fake test data
pub mod fake {
    use super::*;

    /// Generate a fake email address
    pub fn email() -> String {
        format!("test-{}@example.com", Uuid::new_v4().simple())
    }

    /// Generate a fake UUID as a string
    pub fn uuid() -> String {
        Uuid::new_v4().to_string()
    }

    /// Generate a fake firm name
    pub fn firm_name() -> String {
        format!("Test Tax Co {}", &Uuid::new_v4().simple().to_string()[..8])
    }

    /// Generate a processor customer id
    pub fn customer_id() -> String {
        format!("cus_{}", string(14))
    }

    /// Generate a processor subscription id
    pub fn subscription_id() -> String {
        format!("sub_{}", string(14))
    }

    /// Generate a processor event id
    pub fn event_id() -> String {
        format!("evt_{}", string(14))
    }

    /// Generate random file contents
    pub fn bytes(len: usize) -> Vec<u8> {
        (0..len).map(|_| fastrand::u8(..)).collect()
    }

    /// Generate a random string of the given length
    pub fn string(length: usize) -> String {
        (0..length).map(|_| fastrand::alphanumeric()).collect()
    }
}

/// Builder for test tenants in any lifecycle state
#[derive(Debug, Clone)]
pub struct TenantFixture {
    tenant: Tenant,
}

impl TenantFixture {
    /// A tenant in `state`, with the state's entry timestamp set to now
    pub fn new(state: TenantState) -> Self {
        let now = Utc::now();
        let mut tenant = Tenant {
            id: fake::uuid(),
            name: fake::firm_name(),
            email: fake::email(),
            state,
            trial_ends_at: None,
            grace_period_started_at: None,
            suspended_at: None,
            archived_at: None,
            billing: BillingLinkage::default(),
            quotas: TenantQuotas::default(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        match state {
            TenantState::Trial => tenant.trial_ends_at = Some(now + chrono::Duration::days(14)),
            TenantState::Active => {}
            TenantState::GracePeriod => tenant.grace_period_started_at = Some(now),
            TenantState::Suspended => tenant.suspended_at = Some(now),
            TenantState::Archived => {
                tenant.suspended_at = Some(now);
                tenant.archived_at = Some(now);
            }
        }
        Self { tenant }
    }

    pub fn trial() -> Self {
        Self::new(TenantState::Trial)
    }

    pub fn active() -> Self {
        Self::new(TenantState::Active)
    }

    pub fn grace_period() -> Self {
        Self::new(TenantState::GracePeriod)
    }

    pub fn suspended() -> Self {
        Self::new(TenantState::Suspended)
    }

    pub fn archived() -> Self {
        Self::new(TenantState::Archived)
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.tenant.id = id.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.tenant.name = name.into();
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.tenant.email = email.into();
        self
    }

    pub fn customer_id(mut self, customer_id: impl Into<String>) -> Self {
        self.tenant.billing.stripe_customer_id = Some(customer_id.into());
        self
    }

    pub fn subscription(mut self, subscription_id: impl Into<String>, status: impl Into<String>) -> Self {
        self.tenant.billing.stripe_subscription_id = Some(subscription_id.into());
        self.tenant.billing.subscription_status = Some(status.into());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.tenant.created_at = at;
        self.tenant.updated_at = at;
        self
    }

    pub fn grace_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.tenant.grace_period_started_at = Some(at);
        self
    }

    pub fn suspended_at(mut self, at: DateTime<Utc>) -> Self {
        self.tenant.suspended_at = Some(at);
        self
    }

    pub fn without_entry_time(mut self) -> Self {
        self.tenant.grace_period_started_at = None;
        self.tenant.suspended_at = None;
        self.tenant.archived_at = None;
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.tenant.version = version;
        self
    }

    pub fn build(self) -> Tenant {
        self.tenant
    }
}

/// Builder for test file records
#[derive(Debug, Clone)]
pub struct FileFixture {
    file: StoredFile,
}

impl FileFixture {
    /// A live file uploaded now with the default retention
    pub fn new(tenant_id: impl Into<String>) -> Self {
        let now = Utc::now();
        let tenant_id = tenant_id.into();
        let id = fake::uuid();
        let name = format!("{}.pdf", fake::string(8));
        Self {
            file: StoredFile {
                key: crate::files::object_key(&tenant_id, &id, &name),
                id,
                tenant_id,
                uploaded_by: fake::uuid(),
                bucket: "taxflow-files".to_string(),
                original_name: name,
                mime_type: "application/pdf".to_string(),
                size_bytes: 1024,
                retention_days: 2555,
                expires_at: now + chrono::Duration::days(2555),
                uploaded_at: now,
                last_accessed_at: None,
                deleted_at: None,
            },
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.file.id = id.into();
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.file.bucket = bucket.into();
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.file.key = key.into();
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.file.expires_at = at;
        self
    }

    pub fn deleted_at(mut self, at: DateTime<Utc>) -> Self {
        self.file.deleted_at = Some(at);
        self
    }

    pub fn build(self) -> StoredFile {
        self.file
    }
}
