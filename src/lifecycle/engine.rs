//! Lifecycle engine.
//!
//! Validates transitions against the table in [`crate::tenant`], applies
//! timestamp side effects, and pairs every state write with an audit entry.
//! Writes are compare-and-swap on `Tenant::version`; a lost race is reported
//! as `Conflict` and never retried here.

use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogEntry, AuditSink};
use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, Result};
use crate::storage::TenantStore;
use crate::tenant::{BillingLinkage, NewTenant, Tenant, TenantState};
use crate::utils::validation::is_valid_email;
use crate::utils::with_timeout;

const RESOURCE_TYPE: &str = "Tenant";

pub struct LifecycleEngine {
    tenants: Arc<dyn TenantStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
}

impl LifecycleEngine {
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            tenants,
            audit,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Load a tenant, failing with `NotFound` if it doesn't exist.
    #[instrument(skip(self))]
    pub async fn get(&self, tenant_id: &str) -> Result<Tenant> {
        with_timeout(
            self.config.operation_timeout(),
            "tenant_store.get",
            self.tenants.get(tenant_id),
        )
        .await?
        .ok_or_else(|| LifecycleError::not_found(format!("tenant {tenant_id}")))
    }

    /// Move a tenant to `target`.
    ///
    /// # Errors
    ///
    /// - `BadRequest` if `reason` is blank
    /// - `NotFound` if the tenant doesn't exist
    /// - `InvalidTransition` if `target` isn't reachable from the current state
    /// - `Conflict` if another writer changed the tenant first
    /// - `ConsistencyViolation` if the audit write failed and the state write
    ///   could not be undone
    #[instrument(skip(self, reason), fields(tenant_id = %tenant_id, to = %target))]
    pub async fn transition(
        &self,
        tenant_id: &str,
        target: TenantState,
        reason: &str,
        actor_id: Option<&str>,
    ) -> Result<Tenant> {
        let reason = validate_reason(reason)?;
        let current = self.get(tenant_id).await?;
        self.apply_transition(current, target, reason, actor_id).await
    }

    /// Move a tenant to `target` only if it is still exactly as `observed`.
    ///
    /// Jobs and the billing handler act on snapshots they read earlier. If
    /// the tenant has been written since, this fails with `Conflict` instead
    /// of acting on a state the caller never saw.
    #[instrument(skip(self, observed, reason), fields(tenant_id = %observed.id, to = %target))]
    pub async fn transition_observed(
        &self,
        observed: &Tenant,
        target: TenantState,
        reason: &str,
        actor_id: Option<&str>,
    ) -> Result<Tenant> {
        let reason = validate_reason(reason)?;
        self.apply_transition(observed.clone(), target, reason, actor_id)
            .await
    }

    /// Create a tenant in TRIAL.
    #[instrument(skip(self, new_tenant), fields(tenant.name = %new_tenant.name))]
    pub async fn provision(&self, new_tenant: NewTenant) -> Result<Tenant> {
        let name = new_tenant.name.trim();
        if name.is_empty() {
            return Err(LifecycleError::bad_request("Tenant name must not be empty"));
        }
        if !is_valid_email(&new_tenant.email) {
            return Err(LifecycleError::bad_request(format!(
                "Invalid contact email: {}",
                new_tenant.email
            )));
        }

        let now = self.clock.now();
        let tenant = Tenant {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: new_tenant.email.trim().to_lowercase(),
            state: TenantState::Trial,
            trial_ends_at: Some(now + self.config.trial_period()),
            grace_period_started_at: None,
            suspended_at: None,
            archived_at: None,
            billing: BillingLinkage {
                stripe_customer_id: new_tenant.stripe_customer_id,
                ..BillingLinkage::default()
            },
            quotas: new_tenant.quotas,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        with_timeout(
            self.config.operation_timeout(),
            "tenant_store.insert",
            self.tenants.insert(&tenant),
        )
        .await?;

        let entry = AuditLogEntry::new(AuditAction::TenantCreated, &tenant.id, RESOURCE_TYPE, &tenant.id, now)
            .with_after(state_snapshot(&tenant))
            .with_metadata(json!({ "reason": "Tenant signed up" }));

        // Tenants are never deleted, so a created tenant without its audit
        // record can only be reported.
        if let Err(e) = self.append_audit(&entry).await {
            error!(
                target: "taxflow::lifecycle",
                alert = true,
                tenant_id = %tenant.id,
                error = %e,
                "Tenant created without audit record"
            );
            return Err(LifecycleError::consistency_violation(format!(
                "tenant {} created but audit append failed: {e}",
                tenant.id
            )));
        }

        info!(
            target: "taxflow::lifecycle",
            tenant_id = %tenant.id,
            trial_ends_at = ?tenant.trial_ends_at,
            "Tenant provisioned"
        );

        Ok(tenant)
    }

    /// Record the processor-side subscription for a tenant.
    ///
    /// Leaves lifecycle state alone, so no audit entry is written. Returns
    /// the tenant unchanged if the linkage already matches.
    #[instrument(skip(self))]
    pub async fn record_subscription(
        &self,
        tenant_id: &str,
        subscription_id: Option<&str>,
        status: Option<&str>,
    ) -> Result<Tenant> {
        let current = self.get(tenant_id).await?;

        let mut billing = current.billing.clone();
        if let Some(id) = subscription_id {
            billing.stripe_subscription_id = Some(id.to_string());
        }
        if let Some(status) = status {
            billing.subscription_status = Some(status.to_string());
        }

        if billing == current.billing {
            return Ok(current);
        }

        let mut updated = current.clone();
        updated.billing = billing;
        updated.updated_at = self.clock.now();
        updated.version = current.version + 1;

        if !self.save(&updated, current.version).await? {
            return Err(LifecycleError::conflict(&current.id));
        }

        info!(
            target: "taxflow::lifecycle",
            tenant_id = %updated.id,
            subscription_id = ?updated.billing.stripe_subscription_id,
            subscription_status = ?updated.billing.subscription_status,
            "Subscription linkage updated"
        );

        Ok(updated)
    }

    async fn apply_transition(
        &self,
        current: Tenant,
        target: TenantState,
        reason: &str,
        actor_id: Option<&str>,
    ) -> Result<Tenant> {
        let from = current.state;
        if !from.can_transition_to(target) {
            return Err(LifecycleError::InvalidTransition { from, to: target });
        }

        let now = self.clock.now();
        let mut updated = current.clone();
        updated.enter_state(target, now);
        updated.version = current.version + 1;

        if !self.save(&updated, current.version).await? {
            warn!(
                target: "taxflow::lifecycle",
                tenant_id = %current.id,
                from = %from,
                to = %target,
                "Lost race on tenant write"
            );
            return Err(LifecycleError::conflict(&current.id));
        }

        let entry = AuditLogEntry::new(
            AuditAction::TenantStateChange,
            &current.id,
            RESOURCE_TYPE,
            &current.id,
            now,
        )
        .with_actor(actor_id)
        .with_before(state_snapshot(&current))
        .with_after(state_snapshot(&updated))
        .with_metadata(json!({
            "reason": reason,
            "from": from.as_str(),
            "to": target.as_str(),
        }));

        if let Err(audit_err) = self.append_audit(&entry).await {
            return Err(self.compensate(&current, &updated, audit_err).await);
        }

        info!(
            target: "taxflow::lifecycle",
            tenant_id = %updated.id,
            from = %from,
            to = %target,
            reason,
            actor_id = actor_id.unwrap_or("system"),
            "Tenant state changed"
        );

        Ok(updated)
    }

    /// Undo a state write whose audit entry could not be stored.
    ///
    /// Returns the error to hand back to the caller.
    async fn compensate(&self, original: &Tenant, applied: &Tenant, cause: LifecycleError) -> LifecycleError {
        let mut restored = original.clone();
        restored.version = applied.version + 1;

        match self.save(&restored, applied.version).await {
            Ok(true) => {
                warn!(
                    target: "taxflow::lifecycle",
                    tenant_id = %original.id,
                    from = %original.state,
                    to = %applied.state,
                    error = %cause,
                    "Audit append failed, state change rolled back"
                );
                cause
            }
            Ok(false) => {
                error!(
                    target: "taxflow::lifecycle",
                    alert = true,
                    tenant_id = %original.id,
                    from = %original.state,
                    to = %applied.state,
                    error = %cause,
                    "Audit append failed and tenant changed before rollback"
                );
                LifecycleError::consistency_violation(format!(
                    "tenant {} moved {} -> {} without audit record: {cause}",
                    original.id, original.state, applied.state
                ))
            }
            Err(rollback_err) => {
                error!(
                    target: "taxflow::lifecycle",
                    alert = true,
                    tenant_id = %original.id,
                    from = %original.state,
                    to = %applied.state,
                    error = %cause,
                    rollback_error = %rollback_err,
                    "Audit append failed and rollback failed"
                );
                LifecycleError::consistency_violation(format!(
                    "tenant {} moved {} -> {} without audit record: {cause}; rollback failed: {rollback_err}",
                    original.id, original.state, applied.state
                ))
            }
        }
    }

    async fn save(&self, tenant: &Tenant, expected_version: u64) -> Result<bool> {
        with_timeout(
            self.config.operation_timeout(),
            "tenant_store.compare_and_save",
            self.tenants.compare_and_save(tenant, expected_version),
        )
        .await
    }

    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<()> {
        with_timeout(
            self.config.operation_timeout(),
            "audit_sink.append",
            self.audit.append(entry),
        )
        .await
    }
}

fn validate_reason(reason: &str) -> Result<&str> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LifecycleError::bad_request("Transition reason must not be empty"));
    }
    Ok(reason)
}

fn state_snapshot(tenant: &Tenant) -> serde_json::Value {
    json!({
        "state": tenant.state,
        "trial_ends_at": tenant.trial_ends_at,
        "grace_period_started_at": tenant.grace_period_started_at,
        "suspended_at": tenant.suspended_at,
        "archived_at": tenant.archived_at,
        "version": tenant.version,
    })
}
