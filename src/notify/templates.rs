//! Lifecycle email templates.

use super::mailer::Email;
use super::{Notification, NotificationKind};
use crate::config::EmailConfig;

/// Render a notification into an email from `config.from_address`.
///
/// `grace_period_days` is quoted in the payment-failed email.
pub fn render(notification: &Notification, config: &EmailConfig, grace_period_days: u32) -> Email {
    let name = &notification.tenant_name;
    let app = config.app_url.trim_end_matches('/');
    let product = &config.product_name;

    let (subject, heading, paragraphs, link_text, link_path): (String, String, Vec<String>, &str, &str) =
        match notification.kind {
            NotificationKind::PaymentFailed => (
                "Payment Failed - Action Required".to_string(),
                "Payment Failed".to_string(),
                vec![
                    "We were unable to process your recent payment. Your account has been moved to a grace period."
                        .to_string(),
                    format!(
                        "Please update your payment method within {grace_period_days} days to avoid service interruption."
                    ),
                ],
                "Update Payment Method",
                "/billing",
            ),
            NotificationKind::GracePeriodWarning { days_remaining } => (
                format!("Grace Period Ending Soon - {days_remaining} Days Remaining"),
                "Grace Period Ending Soon".to_string(),
                vec![
                    format!(
                        "Your account is in a grace period and will be suspended in {days_remaining} days if payment is not received."
                    ),
                    "Please update your payment method immediately to avoid service interruption.".to_string(),
                ],
                "Update Payment Method",
                "/billing",
            ),
            NotificationKind::SuspensionNotice => (
                "Account Suspended".to_string(),
                "Account Suspended".to_string(),
                vec![
                    "Your account has been suspended due to non-payment. All services have been disabled."
                        .to_string(),
                    "To reactivate your account, please update your payment method and contact support."
                        .to_string(),
                ],
                "Update Payment Method",
                "/billing",
            ),
            NotificationKind::Reactivation => (
                "Account Reactivated".to_string(),
                "Account Reactivated".to_string(),
                vec![
                    "Great news! Your account has been reactivated and all services are now available."
                        .to_string(),
                    "Thank you for your payment.".to_string(),
                ],
                "Access Dashboard",
                "/dashboard",
            ),
            NotificationKind::Welcome => (
                format!("Welcome to {product}"),
                format!("Welcome to {product}"),
                vec![
                    "Thank you for signing up! Your trial has started.".to_string(),
                    "Get started by logging in and exploring the platform.".to_string(),
                ],
                "Login Now",
                "/login",
            ),
        };

    let link = format!("{app}{link_path}");

    let mut html = format!("<h2>{heading}</h2>\n<p>Hello {name},</p>\n");
    for p in &paragraphs {
        html.push_str(&format!("<p>{p}</p>\n"));
    }
    html.push_str(&format!(
        "<p><a href=\"{link}\">{link_text}</a></p>\n<p>Thank you,<br/>The {product} Team</p>\n"
    ));

    let mut text = format!("{heading}\n\nHello {name},\n\n");
    for p in &paragraphs {
        text.push_str(p);
        text.push_str("\n\n");
    }
    text.push_str(&format!("Visit {link}\n\nThank you,\nThe {product} Team"));

    Email::new(&config.from_address, &notification.to, subject)
        .html(html)
        .text(text)
}
