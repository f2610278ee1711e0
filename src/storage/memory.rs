//! In-memory stores for development and testing.
//!
//! Not durable. Use database- and object-storage-backed implementations in
//! production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{BlobStore, FileStore, TenantStore};
use crate::audit::{AuditAction, AuditLogEntry, AuditSink};
use crate::error::{LifecycleError, Result};
use crate::files::StoredFile;
use crate::tenant::{Tenant, TenantFilter, TenantState};

/// Tenants in a shared map. Clones see the same data.
///
/// ```
/// use taxflow::storage::{InMemoryTenantStore, TenantStore};
/// use taxflow::testing::fixtures::TenantFixture;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> taxflow::Result<()> {
/// let store = InMemoryTenantStore::new();
/// let tenant = TenantFixture::active().build();
/// store.insert(&tenant).await?;
///
/// let mut moved = tenant.clone();
/// moved.version += 1;
/// assert!(store.compare_and_save(&moved, tenant.version).await?);
/// // A writer still holding the old version loses
/// assert!(!store.compare_and_save(&moved, tenant.version).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryTenantStore {
    tenants: Arc<RwLock<HashMap<String, Tenant>>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tenants.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tenants.read().await.is_empty()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        Ok(self.tenants.read().await.get(tenant_id).cloned())
    }

    async fn insert(&self, tenant: &Tenant) -> Result<()> {
        let mut tenants = self.tenants.write().await;
        if tenants.contains_key(&tenant.id) {
            return Err(LifecycleError::bad_request(format!(
                "Tenant {} already exists",
                tenant.id
            )));
        }
        tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(())
    }

    async fn compare_and_save(&self, tenant: &Tenant, expected_version: u64) -> Result<bool> {
        let mut tenants = self.tenants.write().await;

        let current = tenants
            .get(&tenant.id)
            .ok_or_else(|| LifecycleError::not_found(format!("tenant {}", tenant.id)))?;

        if current.version != expected_version {
            return Ok(false);
        }

        tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(true)
    }

    async fn find_by_state(&self, state: TenantState, filter: TenantFilter) -> Result<Vec<Tenant>> {
        let tenants = self.tenants.read().await;
        let mut found: Vec<Tenant> = tenants
            .values()
            .filter(|t| t.state == state && filter.matches(t))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn find_by_customer_id(&self, customer_id: &str) -> Result<Option<Tenant>> {
        let tenants = self.tenants.read().await;
        Ok(tenants
            .values()
            .find(|t| t.customer_id() == Some(customer_id))
            .cloned())
    }
}

/// File records keyed by id. Soft-deleted records stay readable via `get`.
#[derive(Clone, Default)]
pub struct InMemoryFileStore {
    files: Arc<RwLock<HashMap<String, StoredFile>>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn insert(&self, file: &StoredFile) -> Result<()> {
        self.files.write().await.insert(file.id.clone(), file.clone());
        Ok(())
    }

    async fn get(&self, file_id: &str) -> Result<Option<StoredFile>> {
        Ok(self.files.read().await.get(file_id).cloned())
    }

    async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<StoredFile>> {
        let files = self.files.read().await;
        let mut found: Vec<StoredFile> = files
            .values()
            .filter(|f| f.tenant_id == tenant_id && !f.is_deleted())
            .cloned()
            .collect();
        found.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<StoredFile>> {
        let files = self.files.read().await;
        let mut found: Vec<StoredFile> = files.values().filter(|f| f.is_expired(now)).cloned().collect();
        found.sort_by(|a, b| a.expires_at.cmp(&b.expires_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn soft_delete(&self, file_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut files = self.files.write().await;
        match files.get_mut(file_id) {
            Some(file) if file.deleted_at.is_none() => {
                file.deleted_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch(&self, file_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut files = self.files.write().await;
        let file = files
            .get_mut(file_id)
            .ok_or_else(|| LifecycleError::not_found(format!("file {file_id}")))?;
        file.last_accessed_at = Some(at);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// Object storage kept in a map keyed by `(bucket, key)`.
#[derive(Clone, Default)]
pub struct InMemoryBlobStore {
    objects: Arc<RwLock<HashMap<(String, String), StoredObject>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .read()
            .await
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub async fn object(&self, bucket: &str, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| (o.bytes.clone(), o.content_type.clone()))
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.objects.write().await.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.objects
            .write()
            .await
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn presigned_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        Ok(format!(
            "memory://{bucket}/{key}?expires_in={}",
            ttl.as_secs()
        ))
    }
}

/// Audit sink that keeps every entry, for assertions in tests.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    entries: Arc<RwLock<Vec<AuditLogEntry>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.read().await.clone()
    }

    pub async fn entries_for(&self, tenant_id: &str) -> Vec<AuditLogEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.tenant_id.as_deref() == Some(tenant_id))
            .cloned()
            .collect()
    }

    pub async fn count(&self, action: AuditAction) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.action == action)
            .count()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }
}
