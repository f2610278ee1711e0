use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::StoredFile;
use crate::audit::{AuditAction, AuditLogEntry, AuditSink};
use crate::error::{LifecycleError, Result};
use crate::storage::{BlobStore, FileStore};
use crate::utils::with_timeout;

/// Removes a file's contents and retires its record.
///
/// Order is blob, then record, then audit. A blob failure leaves the record
/// live so the next attempt retries it.
#[derive(Clone)]
pub struct FilePurger {
    files: Arc<dyn FileStore>,
    blobs: Arc<dyn BlobStore>,
    audit: Arc<dyn AuditSink>,
    timeout: Duration,
}

impl FilePurger {
    pub fn new(
        files: Arc<dyn FileStore>,
        blobs: Arc<dyn BlobStore>,
        audit: Arc<dyn AuditSink>,
        timeout: Duration,
    ) -> Self {
        Self {
            files,
            blobs,
            audit,
            timeout,
        }
    }

    /// Returns `false` if the record was already deleted by someone else.
    pub async fn purge(
        &self,
        file: &StoredFile,
        now: DateTime<Utc>,
        reason: &str,
        actor_id: Option<&str>,
    ) -> Result<bool> {
        with_timeout(
            self.timeout,
            "blob_store.delete",
            self.blobs.delete(&file.bucket, &file.key),
        )
        .await?;

        let deleted = with_timeout(
            self.timeout,
            "file_store.soft_delete",
            self.files.soft_delete(&file.id, now),
        )
        .await?;

        if !deleted {
            tracing::debug!(
                target: "taxflow::files",
                file_id = %file.id,
                tenant_id = %file.tenant_id,
                "File already deleted"
            );
            return Ok(false);
        }

        let entry = AuditLogEntry::new(AuditAction::FileDelete, &file.tenant_id, "File", &file.id, now)
            .with_actor(actor_id)
            .with_before(json!({ "deleted_at": null }))
            .with_after(json!({ "deleted_at": now }))
            .with_metadata(json!({
                "reason": reason,
                "bucket": file.bucket,
                "key": file.key,
                "original_name": file.original_name,
                "expires_at": file.expires_at,
            }));

        if let Err(e) = with_timeout(self.timeout, "audit_sink.append", self.audit.append(&entry)).await {
            tracing::error!(
                target: "taxflow::files",
                alert = true,
                file_id = %file.id,
                tenant_id = %file.tenant_id,
                error = %e,
                "File deleted without audit record"
            );
            return Err(LifecycleError::consistency_violation(format!(
                "file {} deleted but audit append failed: {e}",
                file.id
            )));
        }

        Ok(true)
    }
}
