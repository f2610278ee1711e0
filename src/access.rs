//! Which tenant-facing operations each lifecycle state allows.
//!
//! Consulted before every file or portal operation. The table is a pure
//! function of [`TenantState`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LifecycleError, Result};
use crate::tenant::TenantState;

/// A tenant-facing operation gated by lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    UploadFiles,
    DownloadFiles,
    DeleteFiles,
    AccessPortal,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Self::UploadFiles,
        Self::DownloadFiles,
        Self::DeleteFiles,
        Self::AccessPortal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UploadFiles => "upload files",
            Self::DownloadFiles => "download files",
            Self::DeleteFiles => "delete files",
            Self::AccessPortal => "access portal",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a tenant in a given state may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_upload_files: bool,
    pub can_download_files: bool,
    pub can_delete_files: bool,
    pub can_access_portal: bool,
}

impl Capabilities {
    const FULL: Self = Self {
        can_upload_files: true,
        can_download_files: true,
        can_delete_files: true,
        can_access_portal: true,
    };

    const READ_ONLY: Self = Self {
        can_upload_files: false,
        can_download_files: true,
        can_delete_files: false,
        can_access_portal: true,
    };

    const NONE: Self = Self {
        can_upload_files: false,
        can_download_files: false,
        can_delete_files: false,
        can_access_portal: false,
    };

    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::UploadFiles => self.can_upload_files,
            Capability::DownloadFiles => self.can_download_files,
            Capability::DeleteFiles => self.can_delete_files,
            Capability::AccessPortal => self.can_access_portal,
        }
    }
}

pub fn capabilities(state: TenantState) -> Capabilities {
    match state {
        TenantState::Trial | TenantState::Active => Capabilities::FULL,
        TenantState::GracePeriod => Capabilities::READ_ONLY,
        TenantState::Suspended | TenantState::Archived => Capabilities::NONE,
    }
}

/// Fail with `Forbidden` unless `state` allows `capability`.
pub fn require(state: TenantState, capability: Capability) -> Result<()> {
    if capabilities(state).allows(capability) {
        Ok(())
    } else {
        Err(LifecycleError::Forbidden { capability, state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_table() {
        use TenantState::*;
        // (state, upload, download, delete, portal)
        let table = [
            (Trial, true, true, true, true),
            (Active, true, true, true, true),
            (GracePeriod, false, true, false, true),
            (Suspended, false, false, false, false),
            (Archived, false, false, false, false),
        ];

        for (state, upload, download, delete, portal) in table {
            let caps = capabilities(state);
            assert_eq!(caps.can_upload_files, upload, "{state} upload");
            assert_eq!(caps.can_download_files, download, "{state} download");
            assert_eq!(caps.can_delete_files, delete, "{state} delete");
            assert_eq!(caps.can_access_portal, portal, "{state} portal");
        }
    }

    #[test]
    fn test_require_matches_table() {
        for state in TenantState::ALL {
            for capability in Capability::ALL {
                let allowed = capabilities(state).allows(capability);
                assert_eq!(require(state, capability).is_ok(), allowed);
            }
        }
    }

    #[test]
    fn test_require_reports_capability_and_state() {
        let err = require(TenantState::Suspended, Capability::DownloadFiles).unwrap_err();
        match err {
            LifecycleError::Forbidden { capability, state } => {
                assert_eq!(capability, Capability::DownloadFiles);
                assert_eq!(state, TenantState::Suspended);
            }
            other => panic!("expected Forbidden, got {other:?}"),
        }
    }
}
