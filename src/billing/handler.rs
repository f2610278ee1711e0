//! Applies payment processor events to tenant lifecycle state.

use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::events::{BillingEvent, BillingEventKind, InvoiceObject, SubscriptionObject};
use super::idempotency::IdempotencyStore;
use super::signature::SignatureVerifier;
use crate::audit::{AuditAction, AuditLogEntry, AuditSink};
use crate::error::{LifecycleError, Result};
use crate::lifecycle::LifecycleEngine;
use crate::notify::{Notification, NotificationKind, Notifier, send_best_effort};
use crate::storage::TenantStore;
use crate::tenant::{Tenant, TenantState};
use crate::utils::with_timeout;

/// Result of handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingOutcome {
    /// The tenant's lifecycle state changed.
    Processed,
    /// Recognized and recorded, but nothing needed to change.
    NoChange,
    /// The transition was no longer legal from the tenant's current state.
    Stale,
    /// No tenant matched the event.
    NoTenant,
    /// Event type not acted on. Not recorded in the ledger.
    Ignored,
    /// Already in the ledger.
    Duplicate,
}

impl BillingOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::NoChange => "no_change",
            Self::Stale => "stale",
            Self::NoTenant => "no_tenant",
            Self::Ignored => "ignored",
            Self::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for BillingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Routes processor events into the lifecycle engine.
///
/// Events are deduplicated through the ledger. The ledger entry and the
/// `WebhookProcessed` audit record are written only after handling
/// succeeds, so any error leaves the event to be redelivered.
pub struct BillingEventHandler {
    engine: Arc<LifecycleEngine>,
    tenants: Arc<dyn TenantStore>,
    ledger: Arc<dyn IdempotencyStore>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    verifier: Option<SignatureVerifier>,
}

impl BillingEventHandler {
    pub fn new(
        engine: Arc<LifecycleEngine>,
        tenants: Arc<dyn TenantStore>,
        ledger: Arc<dyn IdempotencyStore>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            engine,
            tenants,
            ledger,
            notifier,
            audit,
            verifier: None,
        }
    }

    pub fn with_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Verify, decode and handle a raw webhook delivery.
    ///
    /// # Errors
    ///
    /// `InvalidSignature` when a verifier is configured and the header
    /// doesn't check out, `InvalidPayload` for undecodable bodies, and any
    /// handling error from [`handle`](Self::handle).
    pub async fn handle_payload(&self, payload: &[u8], signature_header: Option<&str>) -> Result<BillingOutcome> {
        if let Some(verifier) = &self.verifier {
            let header =
                signature_header.ok_or_else(|| LifecycleError::invalid_signature("missing signature header"))?;
            verifier.verify(payload, header, self.engine.clock().now())?;
        }

        let event = BillingEvent::from_slice(payload)?;
        self.handle(&event).await
    }

    /// Apply one decoded event.
    ///
    /// The `WebhookProcessed` audit entry is appended before the event is
    /// marked in the ledger. If the mark fails the call errors, the
    /// processor redelivers, and the retry appends a second
    /// `WebhookProcessed` entry for the same event id. Lifecycle effects are
    /// not repeated: the tenant has already moved, so the retry resolves as
    /// `Stale` or `NoChange`.
    ///
    /// # Errors
    ///
    /// Any ledger, store, engine or audit failure. Nothing is marked
    /// processed on error.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle(&self, event: &BillingEvent) -> Result<BillingOutcome> {
        let timeout = self.engine.config().operation_timeout();

        if with_timeout(timeout, "ledger.is_processed", self.ledger.is_processed(&event.id)).await? {
            info!(target: "taxflow::billing", event_id = %event.id, "Duplicate billing event, skipping");
            return Ok(BillingOutcome::Duplicate);
        }

        let (outcome, tenant_id) = match &event.kind {
            BillingEventKind::SubscriptionCreated(sub) => self.subscription_created(sub).await?,
            BillingEventKind::SubscriptionUpdated(sub) => self.subscription_updated(sub).await?,
            BillingEventKind::SubscriptionDeleted(sub) => self.subscription_deleted(sub).await?,
            BillingEventKind::PaymentFailed(invoice) => self.payment_failed(invoice).await?,
            BillingEventKind::PaymentSucceeded(invoice) => self.payment_succeeded(invoice).await?,
            BillingEventKind::Unrecognized => {
                debug!(target: "taxflow::billing", event_type = %event.event_type, "Unhandled billing event type");
                return Ok(BillingOutcome::Ignored);
            }
        };

        let now = self.engine.clock().now();
        let entry = AuditLogEntry::untenanted(AuditAction::WebhookProcessed, "Webhook", &event.id, now)
            .with_tenant(tenant_id.as_deref())
            .with_metadata(json!({
                "stripeEventId": event.id,
                "eventType": event.event_type,
                "outcome": outcome.as_str(),
            }));
        with_timeout(timeout, "audit_sink.append", self.audit.append(&entry)).await?;

        with_timeout(
            timeout,
            "ledger.mark_processed",
            self.ledger.mark_processed(&event.id, now),
        )
        .await?;

        info!(
            target: "taxflow::billing",
            event_id = %event.id,
            event_type = %event.event_type,
            tenant_id = tenant_id.as_deref().unwrap_or("-"),
            outcome = %outcome,
            "Billing event processed"
        );

        Ok(outcome)
    }

    async fn subscription_created(&self, sub: &SubscriptionObject) -> Result<(BillingOutcome, Option<String>)> {
        let Some(tenant) = self.tenant_for_subscription(sub).await? else {
            return Ok((BillingOutcome::NoTenant, None));
        };

        let tenant = self
            .engine
            .record_subscription(&tenant.id, Some(&sub.id), Some(&sub.status))
            .await?;

        if !sub.is_active() || tenant.state == TenantState::Active {
            return Ok((BillingOutcome::NoChange, Some(tenant.id)));
        }

        let outcome = self
            .apply(&tenant, TenantState::Active, "Subscription activated", None)
            .await?;
        Ok((outcome, Some(tenant.id)))
    }

    async fn subscription_updated(&self, sub: &SubscriptionObject) -> Result<(BillingOutcome, Option<String>)> {
        let Some(tenant) = self.tenant_for_subscription(sub).await? else {
            return Ok((BillingOutcome::NoTenant, None));
        };

        self.engine
            .record_subscription(&tenant.id, Some(&sub.id), Some(&sub.status))
            .await?;
        Ok((BillingOutcome::NoChange, Some(tenant.id)))
    }

    async fn subscription_deleted(&self, sub: &SubscriptionObject) -> Result<(BillingOutcome, Option<String>)> {
        let Some(tenant) = self.tenant_for_subscription(sub).await? else {
            return Ok((BillingOutcome::NoTenant, None));
        };

        let tenant = self
            .engine
            .record_subscription(&tenant.id, Some(&sub.id), Some(&sub.status))
            .await?;
        let outcome = self
            .apply(&tenant, TenantState::GracePeriod, "Subscription canceled", None)
            .await?;
        Ok((outcome, Some(tenant.id)))
    }

    async fn payment_failed(&self, invoice: &InvoiceObject) -> Result<(BillingOutcome, Option<String>)> {
        let Some(tenant) = self.tenant_for_customer(&invoice.customer).await? else {
            return Ok((BillingOutcome::NoTenant, None));
        };

        let outcome = self
            .apply(
                &tenant,
                TenantState::GracePeriod,
                "Payment failed",
                Some(NotificationKind::PaymentFailed),
            )
            .await?;
        Ok((outcome, Some(tenant.id)))
    }

    async fn payment_succeeded(&self, invoice: &InvoiceObject) -> Result<(BillingOutcome, Option<String>)> {
        let Some(tenant) = self.tenant_for_customer(&invoice.customer).await? else {
            return Ok((BillingOutcome::NoTenant, None));
        };

        if tenant.state != TenantState::GracePeriod {
            return Ok((BillingOutcome::NoChange, Some(tenant.id)));
        }

        let outcome = self
            .apply(
                &tenant,
                TenantState::Active,
                "Payment succeeded",
                Some(NotificationKind::Reactivation),
            )
            .await?;
        Ok((outcome, Some(tenant.id)))
    }

    /// Transition `tenant` as observed, then notify on success.
    ///
    /// An illegal transition is a handled no-op. A lost race propagates so
    /// the processor redelivers against the new state.
    async fn apply(
        &self,
        tenant: &Tenant,
        target: TenantState,
        reason: &str,
        notify: Option<NotificationKind>,
    ) -> Result<BillingOutcome> {
        match self.engine.transition_observed(tenant, target, reason, None).await {
            Ok(updated) => {
                if let Some(kind) = notify {
                    let notification = Notification::for_tenant(kind, &updated);
                    if !send_best_effort(
                        self.notifier.as_ref(),
                        &notification,
                        self.engine.config().operation_timeout(),
                    )
                    .await
                    {
                        warn!(
                            target: "taxflow::billing",
                            tenant_id = %updated.id,
                            kind = kind.as_str(),
                            "Billing notification not delivered"
                        );
                    }
                }
                Ok(BillingOutcome::Processed)
            }
            Err(LifecycleError::InvalidTransition { from, to }) => {
                warn!(
                    target: "taxflow::billing",
                    tenant_id = %tenant.id,
                    from = %from,
                    to = %to,
                    reason,
                    "Billing event no longer applies to tenant state"
                );
                Ok(BillingOutcome::Stale)
            }
            Err(e) => Err(e),
        }
    }

    async fn tenant_for_subscription(&self, sub: &SubscriptionObject) -> Result<Option<Tenant>> {
        let timeout = self.engine.config().operation_timeout();

        if let Some(tenant_id) = sub.tenant_id() {
            let tenant = with_timeout(timeout, "tenant_store.get", self.tenants.get(tenant_id)).await?;
            if tenant.is_none() {
                warn!(target: "taxflow::billing", tenant_id, subscription_id = %sub.id, "Subscription names unknown tenant");
            }
            return Ok(tenant);
        }

        match &sub.customer {
            Some(customer) => self.tenant_for_customer(customer).await,
            None => {
                warn!(target: "taxflow::billing", subscription_id = %sub.id, "Subscription has no tenant or customer");
                Ok(None)
            }
        }
    }

    async fn tenant_for_customer(&self, customer_id: &str) -> Result<Option<Tenant>> {
        let tenant = with_timeout(
            self.engine.config().operation_timeout(),
            "tenant_store.find_by_customer_id",
            self.tenants.find_by_customer_id(customer_id),
        )
        .await?;
        if tenant.is_none() {
            warn!(target: "taxflow::billing", customer_id, "No tenant for processor customer");
        }
        Ok(tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LifecycleHarness;
    use crate::testing::fixtures::TenantFixture;
    use serde_json::json;

    fn event(id: &str, event_type: &str, object: serde_json::Value) -> BillingEvent {
        BillingEvent::from_slice(
            &serde_json::to_vec(&json!({"id": id, "type": event_type, "data": {"object": object}})).unwrap(),
        )
        .unwrap()
    }

    fn invoice_event(id: &str, event_type: &str, customer: &str) -> BillingEvent {
        event(id, event_type, json!({"id": "in_1", "customer": customer}))
    }

    /// Ledger whose first `mark_processed` fails.
    #[derive(Default)]
    struct FlakyLedger {
        inner: crate::billing::MemoryIdempotencyStore,
        failed_once: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl IdempotencyStore for FlakyLedger {
        async fn is_processed(&self, event_id: &str) -> Result<bool> {
            self.inner.is_processed(event_id).await
        }

        async fn mark_processed(&self, event_id: &str, at: chrono::DateTime<chrono::Utc>) -> Result<()> {
            if !self.failed_once.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(LifecycleError::transient("ledger unavailable"));
            }
            self.inner.mark_processed(event_id, at).await
        }

        async fn cleanup_old_entries(&self, before: chrono::DateTime<chrono::Utc>) -> Result<usize> {
            self.inner.cleanup_old_entries(before).await
        }
    }

    #[tokio::test]
    async fn test_failed_ledger_mark_redelivers_without_reapplying() {
        let h = LifecycleHarness::new();
        let tenant = h.seed_tenant(TenantFixture::active().customer_id("cus_1")).await;
        let ledger = Arc::new(FlakyLedger::default());
        let handler = BillingEventHandler::new(
            h.engine.clone(),
            Arc::new(h.tenants.clone()),
            ledger.clone(),
            Arc::new(h.notifier.clone()),
            Arc::new(h.audit.clone()),
        );
        let failed = invoice_event("evt_1", "invoice.payment_failed", "cus_1");

        assert!(handler.handle(&failed).await.is_err());
        assert!(!ledger.is_processed("evt_1").await.unwrap());

        assert_eq!(handler.handle(&failed).await.unwrap(), BillingOutcome::Stale);
        assert!(ledger.is_processed("evt_1").await.unwrap());
        assert_eq!(handler.handle(&failed).await.unwrap(), BillingOutcome::Duplicate);

        // One state change and one email, but both deliveries were audited
        assert_eq!(h.audit.count(AuditAction::TenantStateChange).await, 1);
        assert_eq!(h.audit.count(AuditAction::WebhookProcessed).await, 2);
        assert_eq!(h.notifier.sent().await.len(), 1);
        assert_eq!(h.tenant(&tenant.id).await.version, tenant.version + 1);
    }

    #[tokio::test]
    async fn test_payment_failed_moves_to_grace_and_emails() {
        let h = LifecycleHarness::new();
        let tenant = h.seed_tenant(TenantFixture::active().customer_id("cus_1")).await;

        let outcome = h
            .billing_handler()
            .handle(&invoice_event("evt_1", "invoice.payment_failed", "cus_1"))
            .await
            .unwrap();

        assert_eq!(outcome, BillingOutcome::Processed);
        let stored = h.tenant(&tenant.id).await;
        assert_eq!(stored.state, TenantState::GracePeriod);
        assert_eq!(stored.grace_period_started_at, Some(h.clock.now()));
        assert_eq!(h.notifier.kinds_for(&tenant.id).await, vec![NotificationKind::PaymentFailed]);
        assert!(h.ledger.is_processed("evt_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_event_is_not_reapplied() {
        let h = LifecycleHarness::new();
        let tenant = h.seed_tenant(TenantFixture::active().customer_id("cus_1")).await;
        let handler = h.billing_handler();
        let failed = invoice_event("evt_1", "invoice.payment_failed", "cus_1");

        assert_eq!(handler.handle(&failed).await.unwrap(), BillingOutcome::Processed);
        assert_eq!(handler.handle(&failed).await.unwrap(), BillingOutcome::Duplicate);

        assert_eq!(h.notifier.sent().await.len(), 1);
        assert_eq!(h.audit.count(AuditAction::TenantStateChange).await, 1);
        assert_eq!(h.audit.count(AuditAction::WebhookProcessed).await, 1);
        assert_eq!(h.tenant(&tenant.id).await.version, tenant.version + 1);
    }

    #[tokio::test]
    async fn test_payment_succeeded_only_reactivates_grace_period() {
        let h = LifecycleHarness::new();
        let grace = h.seed_tenant(TenantFixture::grace_period().customer_id("cus_g")).await;
        let active = h.seed_tenant(TenantFixture::active().customer_id("cus_a")).await;
        let handler = h.billing_handler();

        let outcome = handler
            .handle(&invoice_event("evt_1", "invoice.payment_succeeded", "cus_g"))
            .await
            .unwrap();
        assert_eq!(outcome, BillingOutcome::Processed);
        let stored = h.tenant(&grace.id).await;
        assert_eq!(stored.state, TenantState::Active);
        assert!(stored.grace_period_started_at.is_none());
        assert_eq!(h.notifier.kinds_for(&grace.id).await, vec![NotificationKind::Reactivation]);

        let outcome = handler
            .handle(&invoice_event("evt_2", "invoice.payment_succeeded", "cus_a"))
            .await
            .unwrap();
        assert_eq!(outcome, BillingOutcome::NoChange);
        assert_eq!(h.tenant(&active.id).await.version, active.version);
        assert!(h.ledger.is_processed("evt_2").await.unwrap());
    }

    #[tokio::test]
    async fn test_illegal_transition_is_stale_not_error() {
        let h = LifecycleHarness::new();
        let tenant = h.seed_tenant(TenantFixture::archived().customer_id("cus_1")).await;

        let outcome = h
            .billing_handler()
            .handle(&invoice_event("evt_1", "invoice.payment_failed", "cus_1"))
            .await
            .unwrap();

        assert_eq!(outcome, BillingOutcome::Stale);
        assert_eq!(h.tenant(&tenant.id).await.state, TenantState::Archived);
        assert!(h.notifier.sent().await.is_empty());
        assert!(h.ledger.is_processed("evt_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_subscription_created_activates_trial() {
        let h = LifecycleHarness::new();
        let tenant = h.seed_tenant(TenantFixture::trial()).await;

        let created = event(
            "evt_1",
            "customer.subscription.created",
            json!({"id": "sub_1", "customer": "cus_1", "status": "active", "metadata": {"tenantId": tenant.id}}),
        );
        let outcome = h.billing_handler().handle(&created).await.unwrap();

        assert_eq!(outcome, BillingOutcome::Processed);
        let stored = h.tenant(&tenant.id).await;
        assert_eq!(stored.state, TenantState::Active);
        assert_eq!(stored.billing.stripe_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(stored.billing.subscription_status.as_deref(), Some("active"));

        let audit = h.audit.entries_for(&tenant.id).await;
        let change = audit
            .iter()
            .find(|e| e.action == AuditAction::TenantStateChange)
            .unwrap();
        assert_eq!(change.reason(), Some("Subscription activated"));
    }

    #[tokio::test]
    async fn test_subscription_created_incomplete_records_status_only() {
        let h = LifecycleHarness::new();
        let tenant = h.seed_tenant(TenantFixture::trial()).await;

        let created = event(
            "evt_1",
            "customer.subscription.created",
            json!({"id": "sub_1", "status": "incomplete", "metadata": {"tenantId": tenant.id}}),
        );
        assert_eq!(h.billing_handler().handle(&created).await.unwrap(), BillingOutcome::NoChange);

        let stored = h.tenant(&tenant.id).await;
        assert_eq!(stored.state, TenantState::Trial);
        assert_eq!(stored.billing.subscription_status.as_deref(), Some("incomplete"));
    }

    #[tokio::test]
    async fn test_subscription_deleted_starts_grace_period() {
        let h = LifecycleHarness::new();
        let tenant = h.seed_tenant(TenantFixture::active().customer_id("cus_1")).await;

        // No tenant metadata; falls back to the customer id
        let deleted = event(
            "evt_1",
            "customer.subscription.deleted",
            json!({"id": "sub_1", "customer": "cus_1", "status": "canceled"}),
        );
        assert_eq!(h.billing_handler().handle(&deleted).await.unwrap(), BillingOutcome::Processed);

        let stored = h.tenant(&tenant.id).await;
        assert_eq!(stored.state, TenantState::GracePeriod);
        assert_eq!(stored.billing.subscription_status.as_deref(), Some("canceled"));
    }

    #[tokio::test]
    async fn test_unknown_customer_and_unrecognized_type() {
        let h = LifecycleHarness::new();
        let handler = h.billing_handler();

        let outcome = handler
            .handle(&invoice_event("evt_1", "invoice.payment_failed", "cus_nobody"))
            .await
            .unwrap();
        assert_eq!(outcome, BillingOutcome::NoTenant);
        assert!(h.ledger.is_processed("evt_1").await.unwrap());

        let outcome = handler
            .handle(&event("evt_2", "charge.refunded", json!({})))
            .await
            .unwrap();
        assert_eq!(outcome, BillingOutcome::Ignored);
        assert!(!h.ledger.is_processed("evt_2").await.unwrap());
        assert_eq!(h.audit.count(AuditAction::WebhookProcessed).await, 1);
    }

    #[tokio::test]
    async fn test_signed_payloads() {
        let h = LifecycleHarness::new();
        h.seed_tenant(TenantFixture::active().customer_id("cus_1")).await;
        let verifier = SignatureVerifier::new("whsec_test".to_string());
        let body = serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": "invoice.payment_failed",
            "data": {"object": {"customer": "cus_1"}}
        }))
        .unwrap();
        let header = verifier.sign(&body, h.clock.now().timestamp()).unwrap();

        let handler = h
            .billing_handler()
            .with_verifier(SignatureVerifier::new("whsec_test".to_string()));

        let err = handler.handle_payload(&body, None).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidSignature(_)));

        let err = handler.handle_payload(b"{}", Some(&header)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidSignature(_)));

        let outcome = handler.handle_payload(&body, Some(&header)).await.unwrap();
        assert_eq!(outcome, BillingOutcome::Processed);
    }
}
