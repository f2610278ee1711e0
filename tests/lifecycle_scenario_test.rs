use serde_json::json;
use taxflow::billing::BillingEvent;
use taxflow::testing::LifecycleHarness;
use taxflow::testing::fixtures::TenantFixture;
use taxflow::{
    AuditAction, BillingOutcome, Capability, LifecycleError, NewTenant, NotificationKind, TenantState,
    UploadRequest,
};

fn billing_event(id: &str, event_type: &str, object: serde_json::Value) -> BillingEvent {
    let body = json!({"id": id, "type": event_type, "data": {"object": object}});
    BillingEvent::from_slice(&serde_json::to_vec(&body).unwrap()).unwrap()
}

#[tokio::test]
async fn test_tenant_lifecycle_from_signup_to_archive() {
    let h = LifecycleHarness::new();
    let files = h.file_service();
    let billing = h.billing_handler();
    let start = h.clock.now();

    // Sign up
    let tenant = h
        .engine
        .provision(NewTenant::new("Acme Tax", "Owner@Acme.test").with_customer_id("cus_acme"))
        .await
        .unwrap();
    assert_eq!(tenant.state, TenantState::Trial);
    assert_eq!(tenant.email, "owner@acme.test");
    assert_eq!(tenant.trial_ends_at, Some(start + chrono::Duration::days(14)));

    // Subscribe
    let outcome = billing
        .handle(&billing_event(
            "evt_sub",
            "customer.subscription.created",
            json!({"id": "sub_acme", "customer": "cus_acme", "status": "active", "metadata": {"tenantId": tenant.id}}),
        ))
        .await
        .unwrap();
    assert_eq!(outcome, BillingOutcome::Processed);
    assert_eq!(h.tenant(&tenant.id).await.state, TenantState::Active);

    let file = files
        .upload(UploadRequest::new(&tenant.id, "user-1", "w2.pdf", "application/pdf", b"%PDF".to_vec()))
        .await
        .unwrap();
    assert!(h.blobs.contains(&file.bucket, &file.key).await);

    // Card declines
    billing
        .handle(&billing_event("evt_fail", "invoice.payment_failed", json!({"customer": "cus_acme"})))
        .await
        .unwrap();
    assert_eq!(h.tenant(&tenant.id).await.state, TenantState::GracePeriod);

    let err = files
        .upload(UploadRequest::new(&tenant.id, "user-1", "1099.pdf", "application/pdf", vec![1]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Forbidden {
            capability: Capability::UploadFiles,
            state: TenantState::GracePeriod
        }
    ));
    assert!(files.download_url(&tenant.id, &file.id, "user-1").await.is_ok());

    // Two days before the grace period ends
    h.clock.advance_days(5);
    let report = h.grace_period_job().run().await.unwrap().completed().unwrap();
    assert_eq!((report.suspended, report.warned), (0, 1));

    h.clock.advance_days(2);
    let report = h.grace_period_job().run().await.unwrap().completed().unwrap();
    assert_eq!(report.suspended, 1);
    let suspended = h.tenant(&tenant.id).await;
    assert_eq!(suspended.state, TenantState::Suspended);
    assert_eq!(suspended.suspended_at, Some(start + chrono::Duration::days(7)));

    let err = files.download_url(&tenant.id, &file.id, "user-1").await.unwrap_err();
    assert_eq!(err.status_code(), 403);

    h.clock.advance_days(30);
    let report = h.archival_job().run().await.unwrap().completed().unwrap();
    assert_eq!(report.tenants_archived, 1);
    let archived = h.tenant(&tenant.id).await;
    assert_eq!(archived.state, TenantState::Archived);
    assert!(archived.archived_at.is_some());

    assert_eq!(
        h.notifier.kinds_for(&tenant.id).await,
        vec![
            NotificationKind::PaymentFailed,
            NotificationKind::GracePeriodWarning { days_remaining: 2 },
            NotificationKind::SuspensionNotice,
        ]
    );

    let reasons: Vec<String> = h
        .audit
        .entries_for(&tenant.id)
        .await
        .iter()
        .filter(|e| e.action == AuditAction::TenantStateChange)
        .filter_map(|e| e.reason().map(str::to_string))
        .collect();
    assert_eq!(
        reasons,
        vec![
            "Subscription activated",
            "Payment failed",
            "Grace period expired",
            "Suspended for extended period",
        ]
    );
}

#[tokio::test]
async fn test_payment_during_grace_period_restores_access() {
    let h = LifecycleHarness::new();
    let tenant = h
        .seed_tenant(TenantFixture::grace_period().customer_id("cus_1").grace_started_at(h.clock.now()))
        .await;

    h.clock.advance_days(3);
    h.billing_handler()
        .handle(&billing_event("evt_paid", "invoice.paid", json!({"customer": "cus_1"})))
        .await
        .unwrap();

    let stored = h.tenant(&tenant.id).await;
    assert_eq!(stored.state, TenantState::Active);
    assert!(stored.grace_period_started_at.is_none());

    // Nothing left for the grace job to do, even after the window would have closed
    h.clock.advance_days(10);
    let report = h.grace_period_job().run().await.unwrap().completed().unwrap();
    assert_eq!(report.suspended, 0);
    assert_eq!(h.tenant(&tenant.id).await.state, TenantState::Active);

    let upload = h
        .file_service()
        .upload(UploadRequest::new(&tenant.id, "user-1", "return.pdf", "application/pdf", vec![7; 16]))
        .await;
    assert!(upload.is_ok());
}

#[tokio::test]
async fn test_expired_files_are_purged_and_audited() {
    let h = LifecycleHarness::new();
    let tenant = h.seed_tenant(TenantFixture::active()).await;
    let files = h.file_service();

    let short = files
        .upload(
            UploadRequest::new(&tenant.id, "user-1", "draft.pdf", "application/pdf", vec![1, 2, 3])
                .with_retention_days(1),
        )
        .await
        .unwrap();
    let long = files
        .upload(UploadRequest::new(&tenant.id, "user-1", "final.pdf", "application/pdf", vec![4, 5, 6]))
        .await
        .unwrap();

    h.clock.advance_days(2);
    let report = h.archival_job().run().await.unwrap().completed().unwrap();
    assert_eq!(report.files_archived, 1);

    assert!(!h.blobs.contains(&short.bucket, &short.key).await);
    assert!(h.blobs.contains(&long.bucket, &long.key).await);

    let remaining: Vec<String> = files.list(&tenant.id).await.unwrap().into_iter().map(|f| f.id).collect();
    assert_eq!(remaining, vec![long.id]);

    let deletes: Vec<_> = h
        .audit
        .entries_for(&tenant.id)
        .await
        .into_iter()
        .filter(|e| e.action == AuditAction::FileDelete)
        .collect();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].resource_id, short.id);
    assert_eq!(deletes[0].reason(), Some("Retention policy expired"));
}
