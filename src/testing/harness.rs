use std::sync::Arc;

use crate::billing::{BillingEventHandler, MemoryIdempotencyStore};
use crate::clock::ManualClock;
use crate::config::LifecycleConfig;
use crate::files::{FilePurger, FileService, StoredFile};
use crate::jobs::{ArchivalJob, GracePeriodJob, InMemoryLeaseStore, LedgerCleanupJob};
use crate::lifecycle::LifecycleEngine;
use crate::retention::RetentionScanner;
use crate::storage::{
    BlobStore, FileStore, InMemoryAuditSink, InMemoryBlobStore, InMemoryFileStore, InMemoryTenantStore,
    TenantStore,
};
use crate::tenant::Tenant;

use super::faults::RecordingNotifier;
use super::fixtures::TenantFixture;

/// Every collaborator wired up in memory, with handles kept for assertions.
///
/// The clock is frozen at construction time; advance it with
/// `h.clock.advance_days(n)`.
pub struct LifecycleHarness {
    pub tenants: InMemoryTenantStore,
    pub files: InMemoryFileStore,
    pub blobs: InMemoryBlobStore,
    pub audit: InMemoryAuditSink,
    pub leases: InMemoryLeaseStore,
    pub notifier: RecordingNotifier,
    pub ledger: MemoryIdempotencyStore,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<LifecycleEngine>,
    pub config: LifecycleConfig,
}

impl LifecycleHarness {
    pub fn new() -> Self {
        Self::with_notifier(RecordingNotifier::new())
    }

    pub fn with_notifier(notifier: RecordingNotifier) -> Self {
        let tenants = InMemoryTenantStore::new();
        let audit = InMemoryAuditSink::new();
        let clock = Arc::new(ManualClock::default());
        let config = LifecycleConfig::default();
        let engine = Arc::new(LifecycleEngine::new(
            Arc::new(tenants.clone()),
            Arc::new(audit.clone()),
            clock.clone(),
            config.clone(),
        ));

        Self {
            tenants,
            files: InMemoryFileStore::new(),
            blobs: InMemoryBlobStore::new(),
            audit,
            leases: InMemoryLeaseStore::new(),
            notifier,
            ledger: MemoryIdempotencyStore::new(),
            clock,
            engine,
            config,
        }
    }

    /// Insert the fixture's tenant and return it.
    ///
    /// # Panics
    ///
    /// The seeding helpers panic if the underlying store rejects the write.
    pub async fn seed_tenant(&self, fixture: TenantFixture) -> Tenant {
        let tenant = fixture.build();
        self.tenants.insert(&tenant).await.expect("Failed to seed tenant");
        tenant
    }

    /// Insert the file record and put a matching blob.
    pub async fn seed_file(&self, file: &StoredFile) {
        self.files.insert(file).await.expect("Failed to seed file record");
        self.blobs
            .put(&file.bucket, &file.key, vec![0u8; file.size_bytes as usize], &file.mime_type)
            .await
            .expect("Failed to seed blob");
    }

    pub async fn tenant(&self, tenant_id: &str) -> Tenant {
        self.tenants
            .get(tenant_id)
            .await
            .expect("Failed to load tenant")
            .unwrap_or_else(|| panic!("tenant {tenant_id} not seeded"))
    }

    pub fn scanner(&self) -> Arc<RetentionScanner> {
        Arc::new(RetentionScanner::new(
            Arc::new(self.tenants.clone()),
            Arc::new(self.files.clone()),
            self.config.operation_timeout(),
        ))
    }

    pub fn purger(&self) -> FilePurger {
        FilePurger::new(
            Arc::new(self.files.clone()),
            Arc::new(self.blobs.clone()),
            Arc::new(self.audit.clone()),
            self.config.operation_timeout(),
        )
    }

    pub fn archival_job(&self) -> ArchivalJob {
        ArchivalJob::new(
            self.scanner(),
            self.purger(),
            self.engine.clone(),
            Arc::new(self.leases.clone()),
        )
    }

    pub fn grace_period_job(&self) -> GracePeriodJob {
        GracePeriodJob::new(
            self.scanner(),
            self.engine.clone(),
            Arc::new(self.notifier.clone()),
            Arc::new(self.leases.clone()),
        )
    }

    pub fn ledger_cleanup_job(&self) -> LedgerCleanupJob {
        LedgerCleanupJob::new(
            Arc::new(self.ledger.clone()),
            self.engine.clone(),
            Arc::new(self.leases.clone()),
        )
    }

    pub fn file_service(&self) -> FileService {
        FileService::new(
            Arc::new(self.tenants.clone()),
            Arc::new(self.files.clone()),
            Arc::new(self.blobs.clone()),
            Arc::new(self.audit.clone()),
            self.clock.clone(),
            self.config.clone(),
        )
    }

    pub fn billing_handler(&self) -> BillingEventHandler {
        BillingEventHandler::new(
            self.engine.clone(),
            Arc::new(self.tenants.clone()),
            Arc::new(self.ledger.clone()),
            Arc::new(self.notifier.clone()),
            Arc::new(self.audit.clone()),
        )
    }
}

impl Default for LifecycleHarness {
    fn default() -> Self {
        Self::new()
    }
}
