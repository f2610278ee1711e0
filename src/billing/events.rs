//! Payment processor events, decoded once at the boundary.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{LifecycleError, Result};

/// Subscription object carried by `customer.subscription.*` events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    pub status: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SubscriptionObject {
    /// Tenant id stamped on the subscription at creation.
    pub fn tenant_id(&self) -> Option<&str> {
        self.metadata
            .get("tenantId")
            .or_else(|| self.metadata.get("tenant_id"))
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// Invoice object carried by `invoice.*` events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InvoiceObject {
    #[serde(default)]
    pub id: Option<String>,
    pub customer: String,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEventKind {
    SubscriptionCreated(SubscriptionObject),
    SubscriptionUpdated(SubscriptionObject),
    SubscriptionDeleted(SubscriptionObject),
    PaymentFailed(InvoiceObject),
    PaymentSucceeded(InvoiceObject),
    /// Any event type the lifecycle doesn't act on.
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingEvent {
    /// Processor-assigned id, used as the idempotency key.
    pub id: String,
    pub event_type: String,
    pub created: Option<DateTime<Utc>>,
    pub kind: BillingEventKind,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: Option<i64>,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

impl BillingEvent {
    /// Decode a processor event payload.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` if the envelope is malformed, or if a recognized
    /// event type carries an object of the wrong shape. Unknown event types
    /// decode to [`BillingEventKind::Unrecognized`] without inspecting the
    /// object.
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        let raw: RawEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(
                target: "taxflow::billing",
                error = %e,
                "Failed to parse billing event payload"
            );
            LifecycleError::invalid_payload("malformed event envelope")
        })?;

        if raw.id.trim().is_empty() {
            return Err(LifecycleError::invalid_payload("event id is empty"));
        }

        let kind = match raw.event_type.as_str() {
            "customer.subscription.created" => BillingEventKind::SubscriptionCreated(decode_object(&raw)?),
            "customer.subscription.updated" => BillingEventKind::SubscriptionUpdated(decode_object(&raw)?),
            "customer.subscription.deleted" => BillingEventKind::SubscriptionDeleted(decode_object(&raw)?),
            "invoice.payment_failed" => BillingEventKind::PaymentFailed(decode_object(&raw)?),
            "invoice.payment_succeeded" | "invoice.paid" => {
                BillingEventKind::PaymentSucceeded(decode_object(&raw)?)
            }
            _ => BillingEventKind::Unrecognized,
        };

        Ok(Self {
            created: raw.created.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            id: raw.id,
            event_type: raw.event_type,
            kind,
        })
    }
}

fn decode_object<T: serde::de::DeserializeOwned>(raw: &RawEvent) -> Result<T> {
    T::deserialize(&raw.data.object).map_err(|e| {
        LifecycleError::invalid_payload(format!("{} object: {e}", raw.event_type))
    })
}
