//! Lifecycle notifications.
//!
//! Delivery is best-effort: a [`Notifier`] reports failure as `false` and
//! never fails the lifecycle operation that triggered it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

mod console;
mod mailer;
mod templates;

pub use console::ConsoleMailer;
pub use mailer::{Email, Mailer};
pub use templates::render;

use crate::config::LifecycleConfig;
use crate::tenant::Tenant;
use crate::utils::with_timeout;

/// Which lifecycle email to send. Each kind maps to one template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    PaymentFailed,
    GracePeriodWarning { days_remaining: u32 },
    SuspensionNotice,
    Reactivation,
    Welcome,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentFailed => "payment_failed",
            Self::GracePeriodWarning { .. } => "grace_period_warning",
            Self::SuspensionNotice => "suspension_notice",
            Self::Reactivation => "reactivation",
            Self::Welcome => "welcome",
        }
    }
}

/// Addressed notification, built from the tenant as it was right after the
/// transition that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub tenant_id: String,
    pub tenant_name: String,
    pub to: String,
}

impl Notification {
    pub fn for_tenant(kind: NotificationKind, tenant: &Tenant) -> Self {
        Self {
            kind,
            tenant_id: tenant.id.clone(),
            tenant_name: tenant.name.clone(),
            to: tenant.email.clone(),
        }
    }
}

/// Delivers lifecycle notifications.
///
/// Failures are reported, not raised: implementations log and return
/// `false`. Callers wrap calls in [`send_best_effort`] so a hung backend
/// can't hold up a job.
///
/// # Example
///
/// ```rust,ignore
/// use taxflow::notify::{Notification, Notifier};
/// use async_trait::async_trait;
///
/// struct SlackNotifier {
///     webhook_url: String,
///     client: reqwest::Client,
/// }
///
/// #[async_trait]
/// impl Notifier for SlackNotifier {
///     async fn send(&self, notification: &Notification) -> bool {
///         let text = format!("{} for {}", notification.kind.as_str(), notification.tenant_name);
///         self.client
///             .post(&self.webhook_url)
///             .json(&serde_json::json!({ "text": text }))
///             .send()
///             .await
///             .is_ok()
///     }
/// }
/// ```
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification. Returns whether it was handed off.
    async fn send(&self, notification: &Notification) -> bool;
}

/// Renders notifications with the built-in templates and sends them through
/// a [`Mailer`].
pub struct MailerNotifier {
    mailer: Arc<dyn Mailer>,
    config: LifecycleConfig,
}

impl MailerNotifier {
    pub fn new(mailer: Arc<dyn Mailer>, config: LifecycleConfig) -> Self {
        Self { mailer, config }
    }
}

#[async_trait]
impl Notifier for MailerNotifier {
    async fn send(&self, notification: &Notification) -> bool {
        let email = render(notification, &self.config.email, self.config.grace_period_days);

        match with_timeout(
            self.config.operation_timeout(),
            "mailer.send",
            self.mailer.send(&email),
        )
        .await
        {
            Ok(()) => {
                tracing::info!(
                    target: "taxflow::notify",
                    tenant_id = %notification.tenant_id,
                    kind = notification.kind.as_str(),
                    subject = %email.subject,
                    "Notification sent"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    target: "taxflow::notify",
                    tenant_id = %notification.tenant_id,
                    kind = notification.kind.as_str(),
                    error = %e,
                    "Notification failed"
                );
                false
            }
        }
    }
}

/// Send through `notifier`, treating a hung notifier as a failed send.
pub async fn send_best_effort(notifier: &dyn Notifier, notification: &Notification, limit: Duration) -> bool {
    match tokio::time::timeout(limit, notifier.send(notification)).await {
        Ok(sent) => sent,
        Err(_) => {
            tracing::warn!(
                target: "taxflow::notify",
                tenant_id = %notification.tenant_id,
                kind = notification.kind.as_str(),
                timeout_seconds = limit.as_secs(),
                "Notification timed out"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LifecycleError, Result};
    use crate::testing::fixtures::TenantFixture;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct CapturingMailer {
        sent: Mutex<Vec<Email>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for CapturingMailer {
        async fn send(&self, email: &Email) -> Result<()> {
            if self.fail {
                return Err(LifecycleError::transient("smtp unavailable"));
            }
            self.sent.lock().await.push(email.clone());
            Ok(())
        }

        fn is_healthy(&self) -> bool {
            !self.fail
        }
    }

    #[tokio::test]
    async fn test_mailer_notifier_renders_and_sends() {
        let mailer = Arc::new(CapturingMailer::default());
        let notifier = MailerNotifier::new(mailer.clone(), LifecycleConfig::default());
        let tenant = TenantFixture::grace_period().email("owner@acme.test").build();

        assert!(
            notifier
                .send(&Notification::for_tenant(NotificationKind::SuspensionNotice, &tenant))
                .await
        );

        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Account Suspended");
        assert_eq!(sent[0].to, vec!["owner@acme.test".to_string()]);
    }

    #[tokio::test]
    async fn test_mailer_failure_reports_false() {
        let mailer = Arc::new(CapturingMailer {
            fail: true,
            ..Default::default()
        });
        let notifier = MailerNotifier::new(mailer, LifecycleConfig::default());
        let tenant = TenantFixture::active().build();

        assert!(
            !notifier
                .send(&Notification::for_tenant(NotificationKind::PaymentFailed, &tenant))
                .await
        );
    }
}
