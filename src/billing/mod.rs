//! Payment processor integration.
//!
//! Incoming events are verified, decoded into [`BillingEvent`], deduplicated
//! against the idempotency ledger, and applied through the lifecycle engine.

mod events;
mod handler;
mod idempotency;
mod signature;

pub use events::{BillingEvent, BillingEventKind, InvoiceObject, SubscriptionObject};
pub use handler::{BillingEventHandler, BillingOutcome};
pub use idempotency::{IdempotencyStore, LEDGER_RETENTION_DAYS, MemoryIdempotencyStore};
pub use signature::{DEFAULT_TOLERANCE_SECONDS, SignatureVerifier};
