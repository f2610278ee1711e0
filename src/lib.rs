//! TaxFlow - tenant lifecycle engine for multi-tenant tax-practice SaaS
//!
//! Every tenant moves through a fixed set of states
//! (`TRIAL -> ACTIVE <-> GRACE_PERIOD -> SUSPENDED -> ARCHIVED`). This crate
//! owns that state machine and everything that hangs off it.
//!
//! # Features
//!
//! - **Lifecycle**: validated, audited, compare-and-swap state transitions
//! - **Access policy**: per-state capabilities for file and portal access
//! - **Files**: tenant-scoped uploads with retention windows
//! - **Retention jobs**: archival of expired files and long-suspended tenants
//! - **Grace period jobs**: suspension on expiry plus advance warnings
//! - **Billing**: idempotent handling of payment processor events
//! - **Testing**: in-memory stores, fault injection, and a wired-up harness
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taxflow::{LifecycleConfigBuilder, LifecycleEngine, NewTenant, SystemClock};
//! use taxflow::storage::{InMemoryAuditSink, InMemoryTenantStore};
//!
//! #[tokio::main]
//! async fn main() -> taxflow::Result<()> {
//!     taxflow::init_tracing();
//!
//!     let config = LifecycleConfigBuilder::new().from_env().build()?;
//!     let engine = LifecycleEngine::new(
//!         Arc::new(InMemoryTenantStore::new()),
//!         Arc::new(InMemoryAuditSink::new()),
//!         Arc::new(SystemClock),
//!         config,
//!     );
//!
//!     let tenant = engine.provision(NewTenant::new("Acme Tax", "owner@acme.test")).await?;
//!     println!("{} is {}", tenant.id, tenant.state);
//!     Ok(())
//! }
//! ```

pub mod access;
pub mod audit;
pub mod billing;
pub mod clock;
mod config;
mod error;
pub mod files;
pub mod jobs;
pub mod lifecycle;
pub mod notify;
pub mod retention;
pub mod storage;
pub mod tenant;
pub mod testing;
pub mod utils;

// Re-exports for public API
pub use access::{Capabilities, Capability, capabilities};
pub use audit::{AuditAction, AuditLogEntry, AuditSink, TracingAuditSink};
pub use billing::{BillingEvent, BillingEventHandler, BillingOutcome, IdempotencyStore, SignatureVerifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EmailConfig, LifecycleConfig, LifecycleConfigBuilder, LoggingConfig};
pub use error::{LifecycleError, Result};
pub use files::{FilePurger, FileService, StoredFile, UploadRequest};
pub use jobs::{
    ArchivalJob, GracePeriodJob, JobLeaseStore, JobOutcome, JobScheduler, LedgerCleanupJob, ScheduledJob,
};
pub use lifecycle::LifecycleEngine;
pub use notify::{Mailer, Notification, NotificationKind, Notifier};
pub use retention::RetentionScanner;
pub use tenant::{NewTenant, Tenant, TenantState};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "taxflow=debug")
/// - `TAXFLOW_LOG_JSON`: Set to "true" for JSON formatted logs
///
/// Audit entries are logged under the `taxflow::audit` target, so
/// `RUST_LOG=info,taxflow::audit=off` silences them.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("TAXFLOW_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    init_subscriber(env_filter, json_logs);
}

/// Initialize tracing from a [`LoggingConfig`]
pub fn init_tracing_with_config(config: &LoggingConfig) {
    init_subscriber(EnvFilter::new(&config.level), config.json);
}

fn init_subscriber(env_filter: EnvFilter, json: bool) {
    // try_init: a second call (tests, embedding apps) keeps the first subscriber
    if json {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    }
}
