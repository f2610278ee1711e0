//! Append-only audit trail.
//!
//! One [`AuditLogEntry`] is written per observable state-changing event.
//! Sinks must make the entry durable before `append` returns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    TenantCreated,
    TenantStateChange,
    FileUpload,
    FileDownload,
    FileDelete,
    WebhookProcessed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenantCreated => "TENANT_CREATED",
            Self::TenantStateChange => "TENANT_STATE_CHANGE",
            Self::FileUpload => "FILE_UPLOAD",
            Self::FileDownload => "FILE_DOWNLOAD",
            Self::FileDelete => "FILE_DELETE",
            Self::WebhookProcessed => "WEBHOOK_PROCESSED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLogEntry {
    pub id: String,
    pub action: AuditAction,
    /// `None` for system actors (jobs, billing events).
    pub actor_id: Option<String>,
    /// `None` for events that could not be tied to a tenant.
    pub tenant_id: Option<String>,
    pub resource_type: String,
    pub resource_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Create an entry for `action` on the given resource.
    #[must_use]
    pub fn new(
        action: AuditAction,
        tenant_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            actor_id: None,
            tenant_id: Some(tenant_id.into()),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            before: None,
            after: None,
            metadata: None,
            timestamp,
        }
    }

    /// Create an entry that belongs to no tenant.
    #[must_use]
    pub fn untenanted(
        action: AuditAction,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id: None,
            ..Self::new(action, String::new(), resource_type, resource_id, timestamp)
        }
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant_id: Option<impl Into<String>>) -> Self {
        self.tenant_id = tenant_id.map(Into::into);
        self
    }

    #[must_use]
    pub fn with_actor(mut self, actor_id: Option<impl Into<String>>) -> Self {
        self.actor_id = actor_id.map(Into::into);
        self
    }

    #[must_use]
    pub fn with_before(mut self, before: serde_json::Value) -> Self {
        self.before = Some(before);
        self
    }

    #[must_use]
    pub fn with_after(mut self, after: serde_json::Value) -> Self {
        self.after = Some(after);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// The `reason` recorded in metadata, if any.
    pub fn reason(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("reason")?.as_str()
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()>;
}

/// Writes audit entries to the log under `taxflow::audit`.
///
/// Useful in development or when a log pipeline is the system of record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        tracing::info!(
            target: "taxflow::audit",
            audit_id = %entry.id,
            action = %entry.action,
            tenant_id = entry.tenant_id.as_deref().unwrap_or("-"),
            resource_type = %entry.resource_type,
            resource_id = %entry.resource_id,
            actor_id = entry.actor_id.as_deref().unwrap_or("system"),
            reason = entry.reason().unwrap_or(""),
            "audit"
        );
        Ok(())
    }
}
