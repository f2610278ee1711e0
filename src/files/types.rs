use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for an uploaded client document.
///
/// `expires_at` is fixed at upload time. A file with `deleted_at` set is
/// gone as far as tenants are concerned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: String,
    pub tenant_id: String,
    pub uploaded_by: String,
    pub bucket: String,
    pub key: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub retention_days: u32,
    pub expires_at: DateTime<Utc>,
    pub uploaded_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StoredFile {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Past retention and still live.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_none() && self.expires_at <= now
    }
}

/// Blob key for a new upload: `tenant-{tenant_id}/files/{file_id}-{name}`.
pub fn object_key(tenant_id: &str, file_id: &str, original_name: &str) -> String {
    format!("tenant-{tenant_id}/files/{file_id}-{original_name}")
}

/// `None` when the retention runs past the representable calendar.
pub(crate) fn expiry(uploaded_at: DateTime<Utc>, retention_days: u32) -> Option<DateTime<Utc>> {
    Duration::try_days(i64::from(retention_days)).and_then(|d| uploaded_at.checked_add_signed(d))
}

/// A tenant user's upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub tenant_id: String,
    pub uploaded_by: String,
    pub original_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    /// Falls back to the configured default when `None`.
    pub retention_days: Option<u32>,
}

impl UploadRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        uploaded_by: impl Into<String>,
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            uploaded_by: uploaded_by.into(),
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            bytes,
            retention_days: None,
        }
    }

    #[must_use]
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_object_key_layout() {
        assert_eq!(
            object_key("t1", "f1", "w2.pdf"),
            "tenant-t1/files/f1-w2.pdf"
        );
    }

    #[test]
    fn test_expiry_boundary() {
        let uploaded = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let expires = expiry(uploaded, 30).unwrap();
        let file = StoredFile {
            id: "f1".into(),
            tenant_id: "t1".into(),
            uploaded_by: "u1".into(),
            bucket: "b".into(),
            key: "k".into(),
            original_name: "a.pdf".into(),
            mime_type: "application/pdf".into(),
            size_bytes: 1,
            retention_days: 30,
            expires_at: expires,
            uploaded_at: uploaded,
            last_accessed_at: None,
            deleted_at: None,
        };

        assert!(!file.is_expired(expires - Duration::seconds(1)));
        assert!(file.is_expired(expires));
    }

    #[test]
    fn test_expiry_out_of_range() {
        let uploaded = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(expiry(uploaded, u32::MAX).is_none());
    }
}
