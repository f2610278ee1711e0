//! Console mailer for development
//!
//! Logs emails instead of sending them. Bodies are redacted unless full
//! output is switched on, since notification emails carry tenant names and
//! addresses.

use async_trait::async_trait;

use super::mailer::{Email, Mailer};
use crate::error::Result;

/// A mailer that writes emails to the log instead of sending them
///
/// **For development only.**
#[derive(Debug, Clone, Default)]
pub struct ConsoleMailer {
    show_full_content: bool,
}

impl ConsoleMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include email bodies in the output
    pub fn with_full_output(mut self, enabled: bool) -> Self {
        if enabled {
            tracing::warn!(
                target: "taxflow::email",
                "ConsoleMailer: full output enabled - email content will be visible in logs"
            );
        }
        self.show_full_content = enabled;
        self
    }
}

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        email.validate()?;

        if self.show_full_content {
            tracing::info!(
                target: "taxflow::email",
                from = %email.from,
                to = ?email.to,
                subject = %email.subject,
                text = email.text.as_deref().unwrap_or(""),
                "Email (console)"
            );
        } else {
            tracing::info!(
                target: "taxflow::email",
                from = %email.from,
                recipients = email.to.len(),
                subject = %email.subject,
                text_bytes = email.text.as_ref().map_or(0, String::len),
                html_bytes = email.html.as_ref().map_or(0, String::len),
                "Email (console, body redacted)"
            );
        }

        Ok(())
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
