use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::types::{expiry, object_key};
use super::{FilePurger, StoredFile, UploadRequest};
use crate::access::{self, Capability};
use crate::audit::{AuditAction, AuditLogEntry, AuditSink};
use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, Result};
use crate::storage::{BlobStore, FileStore, TenantStore};
use crate::tenant::Tenant;
use crate::utils::with_timeout;

/// Tenant-facing file operations.
///
/// Every operation checks the tenant's capabilities before touching
/// storage.
pub struct FileService {
    tenants: Arc<dyn TenantStore>,
    files: Arc<dyn FileStore>,
    blobs: Arc<dyn BlobStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    purger: FilePurger,
    config: LifecycleConfig,
}

impl FileService {
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        files: Arc<dyn FileStore>,
        blobs: Arc<dyn BlobStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        let purger = FilePurger::new(
            files.clone(),
            blobs.clone(),
            audit.clone(),
            config.operation_timeout(),
        );
        Self {
            tenants,
            files,
            blobs,
            audit,
            clock,
            purger,
            config,
        }
    }

    /// Load the tenant and fail with `Forbidden` unless its state allows
    /// `capability`.
    #[instrument(skip(self))]
    pub async fn check_access(&self, tenant_id: &str, capability: Capability) -> Result<Tenant> {
        let tenant = with_timeout(
            self.config.operation_timeout(),
            "tenant_store.get",
            self.tenants.get(tenant_id),
        )
        .await?
        .ok_or_else(|| LifecycleError::not_found(format!("tenant {tenant_id}")))?;

        access::require(tenant.state, capability)?;
        Ok(tenant)
    }

    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id, file.name = %request.original_name))]
    pub async fn upload(&self, request: UploadRequest) -> Result<StoredFile> {
        self.check_access(&request.tenant_id, Capability::UploadFiles).await?;

        let original_name = request.original_name.trim();
        if original_name.is_empty() || original_name.contains('/') {
            return Err(LifecycleError::bad_request(format!(
                "Invalid file name: {:?}",
                request.original_name
            )));
        }
        let retention_days = request
            .retention_days
            .unwrap_or(self.config.default_file_retention_days);
        if retention_days == 0 {
            return Err(LifecycleError::bad_request("Retention must be at least 1 day"));
        }

        let now = self.clock.now();
        let expires_at = expiry(now, retention_days).ok_or_else(|| {
            LifecycleError::bad_request(format!("Retention of {retention_days} days is too long"))
        })?;
        let id = Uuid::new_v4().to_string();
        let file = StoredFile {
            key: object_key(&request.tenant_id, &id, original_name),
            bucket: self.config.files_bucket.clone(),
            id,
            tenant_id: request.tenant_id.clone(),
            uploaded_by: request.uploaded_by.clone(),
            original_name: original_name.to_string(),
            mime_type: request.mime_type.clone(),
            size_bytes: request.bytes.len() as u64,
            retention_days,
            expires_at,
            uploaded_at: now,
            last_accessed_at: None,
            deleted_at: None,
        };

        let timeout = self.config.operation_timeout();
        with_timeout(
            timeout,
            "blob_store.put",
            self.blobs.put(&file.bucket, &file.key, request.bytes, &file.mime_type),
        )
        .await?;

        if let Err(e) = with_timeout(timeout, "file_store.insert", self.files.insert(&file)).await {
            self.discard_blob(&file).await;
            return Err(e);
        }

        let entry = AuditLogEntry::new(AuditAction::FileUpload, &file.tenant_id, "File", &file.id, now)
            .with_actor(Some(file.uploaded_by.as_str()))
            .with_after(json!({
                "original_name": file.original_name,
                "size_bytes": file.size_bytes,
                "expires_at": file.expires_at,
            }));

        if let Err(e) = with_timeout(timeout, "audit_sink.append", self.audit.append(&entry)).await {
            // Withdraw the upload rather than keep an unaudited file.
            // The blob goes only once the record is hidden.
            return match with_timeout(timeout, "file_store.soft_delete", self.files.soft_delete(&file.id, now)).await {
                Ok(_) => {
                    self.discard_blob(&file).await;
                    Err(e)
                }
                Err(withdraw_err) => {
                    error!(
                        target: "taxflow::files",
                        alert = true,
                        file_id = %file.id,
                        tenant_id = %file.tenant_id,
                        error = %e,
                        withdraw_error = %withdraw_err,
                        "Unaudited upload could not be withdrawn"
                    );
                    Err(LifecycleError::consistency_violation(format!(
                        "file {} stored without audit record: {e}; withdraw failed: {withdraw_err}",
                        file.id
                    )))
                }
            };
        }

        info!(
            target: "taxflow::files",
            tenant_id = %file.tenant_id,
            file_id = %file.id,
            size_bytes = file.size_bytes,
            retention_days,
            "File uploaded"
        );

        Ok(file)
    }

    /// Presigned URL for a live file. Records the access.
    #[instrument(skip(self))]
    pub async fn download_url(&self, tenant_id: &str, file_id: &str, actor_id: &str) -> Result<String> {
        self.check_access(tenant_id, Capability::DownloadFiles).await?;
        let file = self.live_file(tenant_id, file_id).await?;

        let timeout = self.config.operation_timeout();
        let url = with_timeout(
            timeout,
            "blob_store.presigned_url",
            self.blobs
                .presigned_url(&file.bucket, &file.key, self.config.presigned_url_ttl()),
        )
        .await?;

        let now = self.clock.now();
        with_timeout(timeout, "file_store.touch", self.files.touch(&file.id, now)).await?;

        let entry = AuditLogEntry::new(AuditAction::FileDownload, tenant_id, "File", &file.id, now)
            .with_actor(Some(actor_id))
            .with_metadata(json!({ "original_name": file.original_name }));
        with_timeout(timeout, "audit_sink.append", self.audit.append(&entry)).await?;

        Ok(url)
    }

    /// User-initiated delete. Removes the blob and soft-deletes the record.
    #[instrument(skip(self))]
    pub async fn delete(&self, tenant_id: &str, file_id: &str, actor_id: &str) -> Result<()> {
        self.check_access(tenant_id, Capability::DeleteFiles).await?;
        let file = self.live_file(tenant_id, file_id).await?;

        let now = self.clock.now();
        if !self.purger.purge(&file, now, "Deleted by user", Some(actor_id)).await? {
            return Err(LifecycleError::not_found(format!("file {file_id}")));
        }

        info!(
            target: "taxflow::files",
            tenant_id,
            file_id,
            actor_id,
            "File deleted"
        );
        Ok(())
    }

    /// Live files for the tenant, newest first.
    #[instrument(skip(self))]
    pub async fn list(&self, tenant_id: &str) -> Result<Vec<StoredFile>> {
        self.check_access(tenant_id, Capability::DownloadFiles).await?;
        with_timeout(
            self.config.operation_timeout(),
            "file_store.list_for_tenant",
            self.files.list_for_tenant(tenant_id),
        )
        .await
    }

    async fn live_file(&self, tenant_id: &str, file_id: &str) -> Result<StoredFile> {
        let file = with_timeout(
            self.config.operation_timeout(),
            "file_store.get",
            self.files.get(file_id),
        )
        .await?;

        // Another tenant's file is reported as missing
        file.filter(|f| f.tenant_id == tenant_id && !f.is_deleted())
            .ok_or_else(|| LifecycleError::not_found(format!("file {file_id}")))
    }

    async fn discard_blob(&self, file: &StoredFile) {
        if let Err(e) = with_timeout(
            self.config.operation_timeout(),
            "blob_store.delete",
            self.blobs.delete(&file.bucket, &file.key),
        )
        .await
        {
            tracing::warn!(
                target: "taxflow::files",
                file_id = %file.id,
                key = %file.key,
                error = %e,
                "Failed to remove orphaned blob"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{InMemoryAuditSink, InMemoryBlobStore, InMemoryFileStore, InMemoryTenantStore};
    use crate::testing::fixtures::{TenantFixture, fake};
    use crate::testing::faults::{FailingAuditSink, FailingFileStore};
    use chrono::Duration;

    struct Setup {
        service: FileService,
        tenants: InMemoryTenantStore,
        files: InMemoryFileStore,
        blobs: InMemoryBlobStore,
        audit: InMemoryAuditSink,
        clock: Arc<ManualClock>,
    }

    fn setup() -> Setup {
        let tenants = InMemoryTenantStore::new();
        let files = InMemoryFileStore::new();
        let blobs = InMemoryBlobStore::new();
        let audit = InMemoryAuditSink::new();
        let clock = Arc::new(ManualClock::default());
        let service = FileService::new(
            Arc::new(tenants.clone()),
            Arc::new(files.clone()),
            Arc::new(blobs.clone()),
            Arc::new(audit.clone()),
            clock.clone(),
            LifecycleConfig::default(),
        );
        Setup {
            service,
            tenants,
            files,
            blobs,
            audit,
            clock,
        }
    }

    async fn tenant_in(s: &Setup, fixture: TenantFixture) -> Tenant {
        let tenant = fixture.build();
        s.tenants.insert(&tenant).await.unwrap();
        tenant
    }

    fn upload_for(tenant: &Tenant) -> UploadRequest {
        UploadRequest::new(&tenant.id, "user_1", "1099-INT.pdf", "application/pdf", fake::bytes(64))
    }

    #[tokio::test]
    async fn test_upload_stores_blob_and_record() {
        let s = setup();
        let tenant = tenant_in(&s, TenantFixture::active()).await;

        let file = s.service.upload(upload_for(&tenant)).await.unwrap();

        assert_eq!(file.bucket, "taxflow-files");
        assert_eq!(file.key, format!("tenant-{}/files/{}-1099-INT.pdf", tenant.id, file.id));
        assert_eq!(file.retention_days, 2555);
        assert_eq!(file.expires_at, s.clock.now() + Duration::days(2555));
        assert_eq!(file.size_bytes, 64);
        assert!(s.blobs.contains(&file.bucket, &file.key).await);
        assert_eq!(s.files.get(&file.id).await.unwrap(), Some(file.clone()));
        assert_eq!(s.audit.count(AuditAction::FileUpload).await, 1);
    }

    #[tokio::test]
    async fn test_upload_forbidden_in_grace_period() {
        let s = setup();
        let tenant = tenant_in(&s, TenantFixture::grace_period()).await;

        let err = s.service.upload(upload_for(&tenant)).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Forbidden {
                capability: Capability::UploadFiles,
                ..
            }
        ));
        assert!(s.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_upload_with_custom_retention() {
        let s = setup();
        let tenant = tenant_in(&s, TenantFixture::trial()).await;

        let file = s
            .service
            .upload(upload_for(&tenant).with_retention_days(30))
            .await
            .unwrap();
        assert_eq!(file.expires_at, s.clock.now() + Duration::days(30));

        let err = s
            .service
            .upload(upload_for(&tenant).with_retention_days(0))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_upload_withdrawn_when_audit_fails() {
        let tenants = InMemoryTenantStore::new();
        let files = InMemoryFileStore::new();
        let blobs = InMemoryBlobStore::new();
        let tenant = TenantFixture::active().build();
        tenants.insert(&tenant).await.unwrap();

        let service = FileService::new(
            Arc::new(tenants),
            Arc::new(files.clone()),
            Arc::new(blobs.clone()),
            Arc::new(FailingAuditSink::always()),
            Arc::new(ManualClock::default()),
            LifecycleConfig::default(),
        );

        assert!(service.upload(upload_for(&tenant)).await.is_err());
        assert!(files.list_for_tenant(&tenant.id).await.unwrap().is_empty());
        assert!(blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_upload_rejects_unrepresentable_retention() {
        let s = setup();
        let tenant = tenant_in(&s, TenantFixture::active()).await;

        let err = s
            .service
            .upload(upload_for(&tenant).with_retention_days(u32::MAX))
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::BadRequest(_)));
        assert!(s.blobs.is_empty().await);
        assert!(s.files.list_for_tenant(&tenant.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_keeps_blob_when_withdrawal_fails() {
        let tenants = InMemoryTenantStore::new();
        let files = FailingFileStore::new(InMemoryFileStore::new());
        let blobs = InMemoryBlobStore::new();
        let tenant = TenantFixture::active().build();
        tenants.insert(&tenant).await.unwrap();

        let service = FileService::new(
            Arc::new(tenants),
            Arc::new(files.clone()),
            Arc::new(blobs.clone()),
            Arc::new(FailingAuditSink::for_action(AuditAction::FileUpload)),
            Arc::new(ManualClock::default()),
            LifecycleConfig::default(),
        );

        let err = service.upload(upload_for(&tenant)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::ConsistencyViolation(_)));

        // The live record must keep pointing at a real object
        let live = files.inner().list_for_tenant(&tenant.id).await.unwrap();
        assert_eq!(live.len(), 1);
        assert!(blobs.contains(&live[0].bucket, &live[0].key).await);
    }

    #[tokio::test]
    async fn test_delete_forbidden_in_grace_period() {
        let s = setup();
        let tenant = tenant_in(&s, TenantFixture::active()).await;
        let file = s.service.upload(upload_for(&tenant)).await.unwrap();

        let mut grace = tenant.clone();
        grace.state = crate::tenant::TenantState::GracePeriod;
        grace.version += 1;
        assert!(s.tenants.compare_and_save(&grace, tenant.version).await.unwrap());

        let err = s.service.delete(&tenant.id, &file.id, "user_1").await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Forbidden {
                capability: Capability::DeleteFiles,
                ..
            }
        ));
        assert!(s.blobs.contains(&file.bucket, &file.key).await);
        assert_eq!(s.service.list(&tenant.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_download_in_grace_period_records_access() {
        let s = setup();
        let tenant = tenant_in(&s, TenantFixture::active()).await;
        let file = s.service.upload(upload_for(&tenant)).await.unwrap();

        let mut grace = tenant.clone();
        grace.state = crate::tenant::TenantState::GracePeriod;
        grace.version += 1;
        s.tenants.compare_and_save(&grace, tenant.version).await.unwrap();

        s.clock.advance(Duration::hours(1));
        let url = s.service.download_url(&tenant.id, &file.id, "user_2").await.unwrap();
        assert!(url.contains(&file.key));

        let stored = s.files.get(&file.id).await.unwrap().unwrap();
        assert_eq!(stored.last_accessed_at, Some(s.clock.now()));
        assert_eq!(s.audit.count(AuditAction::FileDownload).await, 1);
    }

    #[tokio::test]
    async fn test_suspended_tenant_cannot_download_or_list() {
        let s = setup();
        let tenant = tenant_in(&s, TenantFixture::suspended()).await;

        let err = s.service.download_url(&tenant.id, "f1", "user_1").await.unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(s.service.list(&tenant.id).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_removes_blob_and_hides_file() {
        let s = setup();
        let tenant = tenant_in(&s, TenantFixture::active()).await;
        let file = s.service.upload(upload_for(&tenant)).await.unwrap();

        s.service.delete(&tenant.id, &file.id, "user_1").await.unwrap();

        assert!(!s.blobs.contains(&file.bucket, &file.key).await);
        assert!(s.service.list(&tenant.id).await.unwrap().is_empty());

        let err = s.service.download_url(&tenant.id, &file.id, "user_1").await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));

        let deletes: Vec<_> = s
            .audit
            .entries()
            .await
            .into_iter()
            .filter(|e| e.action == AuditAction::FileDelete)
            .collect();
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].reason(), Some("Deleted by user"));
        assert_eq!(deletes[0].actor_id.as_deref(), Some("user_1"));
    }

    #[tokio::test]
    async fn test_other_tenants_files_are_not_found() {
        let s = setup();
        let owner = tenant_in(&s, TenantFixture::active()).await;
        let other = tenant_in(&s, TenantFixture::active()).await;
        let file = s.service.upload(upload_for(&owner)).await.unwrap();

        let err = s.service.download_url(&other.id, &file.id, "user_9").await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
        let err = s.service.delete(&other.id, &file.id, "user_9").await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
    }
}
