//! Collaborators that fail, stall, or record on demand.
//!
//! Each wrapper delegates to an in-memory store and injects the fault it is
//! named after.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Barrier, Mutex};

use crate::audit::{AuditAction, AuditLogEntry, AuditSink};
use crate::error::{LifecycleError, Result};
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::files::StoredFile;
use crate::storage::{BlobStore, FileStore, InMemoryAuditSink, InMemoryBlobStore, InMemoryFileStore, TenantStore};
use crate::tenant::{Tenant, TenantFilter, TenantState};

/// Audit sink that rejects some or all entries.
#[derive(Clone)]
pub struct FailingAuditSink {
    inner: InMemoryAuditSink,
    fail_actions: Option<HashSet<AuditAction>>,
}

impl FailingAuditSink {
    /// Reject every entry.
    pub fn always() -> Self {
        Self {
            inner: InMemoryAuditSink::new(),
            fail_actions: None,
        }
    }

    /// Reject entries for `action`, record everything else.
    pub fn for_action(action: AuditAction) -> Self {
        Self {
            inner: InMemoryAuditSink::new(),
            fail_actions: Some(HashSet::from([action])),
        }
    }

    /// Entries that were accepted.
    pub fn recorded(&self) -> &InMemoryAuditSink {
        &self.inner
    }
}

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        let fails = match &self.fail_actions {
            None => true,
            Some(actions) => actions.contains(&entry.action),
        };
        if fails {
            return Err(LifecycleError::transient("audit store unavailable"));
        }
        self.inner.append(entry).await
    }
}

/// Blob store whose deletes fail or stall for chosen keys.
#[derive(Clone, Default)]
pub struct FailingBlobStore {
    inner: InMemoryBlobStore,
    failing_keys: Arc<Mutex<HashSet<String>>>,
    delete_delay: Option<Duration>,
}

impl FailingBlobStore {
    pub fn new(inner: InMemoryBlobStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub async fn fail_delete_for(&self, key: impl Into<String>) {
        self.failing_keys.lock().await.insert(key.into());
    }

    /// Make every delete take `delay` before completing.
    pub fn with_delete_delay(mut self, delay: Duration) -> Self {
        self.delete_delay = Some(delay);
        self
    }

    pub fn inner(&self) -> &InMemoryBlobStore {
        &self.inner
    }
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.inner.put(bucket, key, bytes, content_type).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        if let Some(delay) = self.delete_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_keys.lock().await.contains(key) {
            return Err(LifecycleError::transient(format!("blob delete failed for {key}")));
        }
        self.inner.delete(bucket, key).await
    }

    async fn presigned_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        self.inner.presigned_url(bucket, key, ttl).await
    }
}

/// File store whose soft deletes fail. Everything else hits the inner store.
#[derive(Clone, Default)]
pub struct FailingFileStore {
    inner: InMemoryFileStore,
}

impl FailingFileStore {
    pub fn new(inner: InMemoryFileStore) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &InMemoryFileStore {
        &self.inner
    }
}

#[async_trait]
impl FileStore for FailingFileStore {
    async fn insert(&self, file: &StoredFile) -> Result<()> {
        self.inner.insert(file).await
    }

    async fn get(&self, file_id: &str) -> Result<Option<StoredFile>> {
        self.inner.get(file_id).await
    }

    async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<StoredFile>> {
        self.inner.list_for_tenant(tenant_id).await
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<StoredFile>> {
        self.inner.find_expired(now).await
    }

    async fn soft_delete(&self, file_id: &str, _at: DateTime<Utc>) -> Result<bool> {
        Err(LifecycleError::transient(format!("file store rejected delete of {file_id}")))
    }

    async fn touch(&self, file_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.inner.touch(file_id, at).await
    }
}

/// Tenant store whose writes start failing after a number of successes.
pub struct FailingTenantStore<S> {
    inner: S,
    saves_before_failure: usize,
    saves: AtomicUsize,
}

impl<S: TenantStore> FailingTenantStore<S> {
    pub fn fail_saves_after(inner: S, successes: usize) -> Self {
        Self {
            inner,
            saves_before_failure: successes,
            saves: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<S: TenantStore> TenantStore for FailingTenantStore<S> {
    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        self.inner.get(tenant_id).await
    }

    async fn insert(&self, tenant: &Tenant) -> Result<()> {
        self.inner.insert(tenant).await
    }

    async fn compare_and_save(&self, tenant: &Tenant, expected_version: u64) -> Result<bool> {
        if self.saves.fetch_add(1, Ordering::SeqCst) >= self.saves_before_failure {
            return Err(LifecycleError::transient("tenant store unavailable"));
        }
        self.inner.compare_and_save(tenant, expected_version).await
    }

    async fn find_by_state(&self, state: TenantState, filter: TenantFilter) -> Result<Vec<Tenant>> {
        self.inner.find_by_state(state, filter).await
    }

    async fn find_by_customer_id(&self, customer_id: &str) -> Result<Option<Tenant>> {
        self.inner.find_by_customer_id(customer_id).await
    }
}

/// Tenant store that holds every `get` until `parties` callers are waiting,
/// so concurrent writers are guaranteed to observe the same version.
pub struct GatedTenantStore<S> {
    inner: S,
    barrier: Barrier,
}

impl<S: TenantStore> GatedTenantStore<S> {
    pub fn new(inner: S, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
        }
    }
}

#[async_trait]
impl<S: TenantStore> TenantStore for GatedTenantStore<S> {
    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let tenant = self.inner.get(tenant_id).await?;
        self.barrier.wait().await;
        Ok(tenant)
    }

    async fn insert(&self, tenant: &Tenant) -> Result<()> {
        self.inner.insert(tenant).await
    }

    async fn compare_and_save(&self, tenant: &Tenant, expected_version: u64) -> Result<bool> {
        self.inner.compare_and_save(tenant, expected_version).await
    }

    async fn find_by_state(&self, state: TenantState, filter: TenantFilter) -> Result<Vec<Tenant>> {
        self.inner.find_by_state(state, filter).await
    }

    async fn find_by_customer_id(&self, customer_id: &str) -> Result<Option<Tenant>> {
        self.inner.find_by_customer_id(customer_id).await
    }
}

/// Notifier that records what it was asked to send.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record notifications but report every send as failed.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    pub async fn kinds_for(&self, tenant_id: &str) -> Vec<NotificationKind> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.tenant_id == tenant_id)
            .map(|n| n.kind)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> bool {
        self.sent.lock().await.push(notification.clone());
        !self.failing
    }
}
