use std::sync::Arc;

use serde_json::json;
use taxflow::billing::{BillingEvent, BillingEventHandler, MemoryIdempotencyStore};
use taxflow::storage::{InMemoryAuditSink, InMemoryTenantStore, TenantStore};
use taxflow::testing::faults::{GatedTenantStore, RecordingNotifier};
use taxflow::testing::fixtures::TenantFixture;
use taxflow::{AuditAction, BillingOutcome, LifecycleConfig, LifecycleEngine, LifecycleError, ManualClock, TenantState};

struct Gated {
    tenants: InMemoryTenantStore,
    gate: Arc<GatedTenantStore<InMemoryTenantStore>>,
    audit: InMemoryAuditSink,
    engine: Arc<LifecycleEngine>,
}

/// An engine whose reads all wait for one another, so two concurrent
/// writers start from the same version.
fn gated_engine(parties: usize) -> Gated {
    let tenants = InMemoryTenantStore::new();
    let audit = InMemoryAuditSink::new();
    let gate = Arc::new(GatedTenantStore::new(tenants.clone(), parties));
    let engine = Arc::new(LifecycleEngine::new(
        gate.clone(),
        Arc::new(audit.clone()),
        Arc::new(ManualClock::default()),
        LifecycleConfig::default(),
    ));
    Gated {
        tenants,
        gate,
        audit,
        engine,
    }
}

#[tokio::test]
async fn test_concurrent_transitions_exactly_one_wins() {
    let g = gated_engine(2);
    let tenant = TenantFixture::active().build();
    g.tenants.insert(&tenant).await.unwrap();

    let (a, b) = tokio::join!(
        g.engine.transition(&tenant.id, TenantState::GracePeriod, "Payment failed", None),
        g.engine.transition(&tenant.id, TenantState::GracePeriod, "Payment failed", None),
    );

    let results = [a, b];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(LifecycleError::Conflict { .. })))
        .count();
    assert_eq!((wins, conflicts), (1, 1));

    let stored = g.tenants.get(&tenant.id).await.unwrap().unwrap();
    assert_eq!(stored.state, TenantState::GracePeriod);
    assert_eq!(stored.version, tenant.version + 1);
    assert_eq!(g.audit.count(AuditAction::TenantStateChange).await, 1);
}

#[tokio::test]
async fn test_payment_failure_racing_suspension_from_active() {
    let g = gated_engine(2);
    let tenant = TenantFixture::active().build();
    g.tenants.insert(&tenant).await.unwrap();

    let (grace, suspended) = tokio::join!(
        g.engine.transition(&tenant.id, TenantState::GracePeriod, "Payment failed", None),
        g.engine.transition(&tenant.id, TenantState::Suspended, "Admin suspension", None),
    );

    let (winner, loser) = match (grace, suspended) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        (a, b) => panic!("expected exactly one winner, got {a:?} and {b:?}"),
    };
    assert!(matches!(loser, LifecycleError::Conflict { .. }));

    let stored = g.tenants.get(&tenant.id).await.unwrap().unwrap();
    assert_eq!(stored.state, winner.state);
    assert_eq!(stored.version, tenant.version + 1);

    let entries = g.audit.entries_for(&tenant.id).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].after.as_ref().unwrap()["state"], json!(stored.state.as_str()));
}

#[tokio::test]
async fn test_competing_targets_leave_one_audited_outcome() {
    let g = gated_engine(2);
    let tenant = TenantFixture::grace_period().build();
    g.tenants.insert(&tenant).await.unwrap();

    // Reactivation racing with suspension
    let (paid, suspended) = tokio::join!(
        g.engine.transition(&tenant.id, TenantState::Active, "Payment succeeded", None),
        g.engine.transition(&tenant.id, TenantState::Suspended, "Grace period expired", None),
    );
    assert!(paid.is_ok() ^ suspended.is_ok());

    let stored = g.tenants.get(&tenant.id).await.unwrap().unwrap();
    let entries = g.audit.entries_for(&tenant.id).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].after.as_ref().unwrap()["state"], json!(stored.state.as_str()));
}

#[tokio::test]
async fn test_duplicate_deliveries_apply_once() {
    let g = gated_engine(2);
    let tenant = TenantFixture::active().customer_id("cus_1").build();
    g.tenants.insert(&tenant).await.unwrap();

    let ledger = MemoryIdempotencyStore::new();
    let handler = BillingEventHandler::new(
        g.engine.clone(),
        g.gate.clone(),
        Arc::new(ledger.clone()),
        Arc::new(RecordingNotifier::new()),
        Arc::new(g.audit.clone()),
    );
    let body = json!({
        "id": "evt_1",
        "type": "customer.subscription.deleted",
        "data": {"object": {"id": "sub_1", "status": "canceled", "metadata": {"tenantId": tenant.id}}}
    });
    let event = BillingEvent::from_slice(&serde_json::to_vec(&body).unwrap()).unwrap();

    // Both deliveries pass the ledger check before either is recorded
    let (a, b) = tokio::join!(handler.handle(&event), handler.handle(&event));
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(LifecycleError::Conflict { .. })))
    );

    // The processor redelivers the loser, which now finds the ledger entry
    let redelivered = handler.handle(&event).await.unwrap();
    assert_eq!(redelivered, BillingOutcome::Duplicate);

    let stored = g.tenants.get(&tenant.id).await.unwrap().unwrap();
    assert_eq!(stored.state, TenantState::GracePeriod);
    assert_eq!(g.audit.count(AuditAction::TenantStateChange).await, 1);
    assert_eq!(g.audit.count(AuditAction::WebhookProcessed).await, 1);
    assert_eq!(ledger.len().await, 1);
}
