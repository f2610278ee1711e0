//! Tenant model and the lifecycle state machine.
//!
//! ```text
//! TRIAL        -> ACTIVE, SUSPENDED
//! ACTIVE       -> GRACE_PERIOD, SUSPENDED
//! GRACE_PERIOD -> ACTIVE, SUSPENDED
//! SUSPENDED    -> ACTIVE, ARCHIVED
//! ARCHIVED     -> (terminal)
//! ```

mod state;
mod types;

pub use state::{TenantState, can_transition};
pub use types::{BillingLinkage, NewTenant, Tenant, TenantFilter, TenantQuotas};
