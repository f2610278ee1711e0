//! Testing utilities for lifecycle code.
//!
//! - [`fixtures`]: builders for tenants and stored files with sensible defaults
//! - [`faults`]: store, sink and notifier wrappers that fail on demand
//! - [`LifecycleHarness`]: the whole engine wired up in memory
//!
//! # Example
//!
//! ```rust,ignore
//! use taxflow::testing::{LifecycleHarness, fixtures::TenantFixture};
//! use taxflow::TenantState;
//!
//! #[tokio::test]
//! async fn suspends_after_grace() {
//!     let h = LifecycleHarness::new();
//!     let tenant = h.seed_tenant(TenantFixture::grace_period()).await;
//!     h.clock.advance_days(7);
//!
//!     h.grace_period_job().run().await.unwrap();
//!     assert_eq!(h.tenant(&tenant.id).await.state, TenantState::Suspended);
//! }
//! ```

pub mod faults;
pub mod fixtures;
mod harness;

pub use harness::LifecycleHarness;
