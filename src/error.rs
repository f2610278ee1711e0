use crate::access::Capability;
use crate::tenant::TenantState;

/// The main error type for lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// The requested state change is not legal from the current state.
    ///
    /// This is a rejected-but-handled result: batch and billing callers
    /// treat it as a no-op.
    #[error("Cannot transition from {from} to {to}")]
    InvalidTransition { from: TenantState, to: TenantState },

    /// Another writer changed the tenant between read and write.
    #[error("Tenant {tenant_id} was modified concurrently")]
    Conflict { tenant_id: String },

    #[error("Forbidden: cannot {capability} while tenant is {state}")]
    Forbidden {
        capability: Capability,
        state: TenantState,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Repository, blob store, mailer or ledger failure. Retried by the next
    /// scheduled run or by processor redelivery.
    #[error("Transient infrastructure failure: {0}")]
    Transient(String),

    #[error("Operation timed out: {operation} after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// A state write could not be paired with its audit record and could not
    /// be rolled back. Must be alerted on.
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
}

impl LifecycleError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn consistency_violation(msg: impl Into<String>) -> Self {
        Self::ConsistencyViolation(msg.into())
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn invalid_signature(msg: impl Into<String>) -> Self {
        Self::InvalidSignature(msg.into())
    }

    pub fn conflict(tenant_id: impl Into<String>) -> Self {
        Self::Conflict {
            tenant_id: tenant_id.into(),
        }
    }

    /// Whether a later attempt at the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Timeout { .. } | Self::Conflict { .. }
        )
    }

    /// Whether the engine rejected a transition because the tenant is no
    /// longer in the state the caller expected.
    ///
    /// Batch jobs log these as warnings rather than failures.
    pub fn is_rejected_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. } | Self::Conflict { .. })
    }

    /// HTTP-style status code for surfacing this error to an end caller.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidTransition { .. } | Self::Conflict { .. } => 409,
            Self::Forbidden { .. } => 403,
            Self::BadRequest(_) | Self::InvalidPayload(_) | Self::InvalidSignature(_) => 400,
            Self::Transient(_) => 503,
            Self::Timeout { .. } => 504,
            Self::ConsistencyViolation(_) => 500,
        }
    }
}

impl From<serde_json::Error> for LifecycleError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
