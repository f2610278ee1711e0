//! Persistence seams.
//!
//! The engine, jobs and services only see these traits. Backends must make
//! writes durable before returning and must implement `compare_and_save`
//! atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::Result;
use crate::files::StoredFile;
use crate::tenant::{Tenant, TenantFilter, TenantState};

pub mod memory;

pub use memory::{InMemoryAuditSink, InMemoryBlobStore, InMemoryFileStore, InMemoryTenantStore};

/// Tenant records.
///
/// Implement this for your database. [`InMemoryTenantStore`] is the
/// reference for the expected semantics.
///
/// # Errors
///
/// Every method returns the backend's failure as an error, preferably
/// [`LifecycleError::Transient`](crate::LifecycleError::Transient) so jobs
/// retry the item on their next run. "Not found" is `Ok(None)` on reads.
///
/// # Example
///
/// ```rust,ignore
/// use taxflow::storage::TenantStore;
///
/// struct PgTenantStore {
///     pool: sqlx::PgPool,
/// }
///
/// #[async_trait]
/// impl TenantStore for PgTenantStore {
///     async fn compare_and_save(&self, tenant: &Tenant, expected_version: u64) -> Result<bool> {
///         let rows = sqlx::query("UPDATE tenants SET state = $2, version = $3 WHERE id = $1 AND version = $4")
///             .bind(&tenant.id)
///             .bind(tenant.state.as_str())
///             .bind(tenant.version as i64)
///             .bind(expected_version as i64)
///             .execute(&self.pool)
///             .await
///             .map_err(|e| LifecycleError::transient(e.to_string()))?
///             .rows_affected();
///         Ok(rows == 1)
///     }
///
///     // ...
/// }
/// ```
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>>;

    /// Insert a new tenant. Fails if the id is taken.
    async fn insert(&self, tenant: &Tenant) -> Result<()>;

    /// Replace the stored tenant only if its version still equals
    /// `expected_version`.
    ///
    /// Returns `Ok(false)` on a version mismatch. Implementations must do the
    /// check and the write atomically, e.g.
    ///
    /// ```sql
    /// UPDATE tenants SET ..., version = $new
    /// WHERE id = $1 AND version = $expected
    /// ```
    async fn compare_and_save(&self, tenant: &Tenant, expected_version: u64) -> Result<bool>;

    /// Tenants in `state` that pass `filter`. Jobs call this with a cutoff
    /// on `grace_period_started_at` or `suspended_at`, which deserve an
    /// index alongside `state`.
    async fn find_by_state(&self, state: TenantState, filter: TenantFilter) -> Result<Vec<Tenant>>;

    /// Lookup by payment processor customer id.
    async fn find_by_customer_id(&self, customer_id: &str) -> Result<Option<Tenant>>;
}

/// Metadata for uploaded files. Records are soft-deleted and kept for the
/// audit trail.
///
/// # Errors
///
/// Backend failures. `touch` on a missing file is `NotFound`.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn insert(&self, file: &StoredFile) -> Result<()>;

    /// Fetch a record, including soft-deleted ones.
    async fn get(&self, file_id: &str) -> Result<Option<StoredFile>>;

    /// Live files for a tenant, newest first.
    async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<StoredFile>>;

    /// Live files with `expires_at <= now`.
    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<StoredFile>>;

    /// Set `deleted_at`. Returns `false` if the file is missing or already
    /// deleted.
    async fn soft_delete(&self, file_id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Record a download.
    async fn touch(&self, file_id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Object storage holding file contents.
///
/// `presigned_url` must not touch the object; it only signs a time-limited
/// GET for `ttl`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Remove an object. Deleting a missing object succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    async fn presigned_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String>;
}
