//! Mailer trait and the outgoing email message.

use async_trait::async_trait;

use crate::error::{LifecycleError, Result};

/// An email message to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    /// Sender address (e.g., "noreply@taxflow.app")
    pub from: String,
    /// Recipient addresses
    pub to: Vec<String>,
    pub subject: String,
    /// Plain text body (optional if html is provided)
    pub text: Option<String>,
    /// HTML body (optional if text is provided)
    pub html: Option<String>,
}

impl Email {
    /// Create a new email with the required fields
    pub fn new(from: impl Into<String>, to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: vec![to.into()],
            subject: subject.into(),
            text: None,
            html: None,
        }
    }

    /// Set the plain text body
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text = Some(body.into());
        self
    }

    /// Set the HTML body
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html = Some(body.into());
        self
    }

    /// Validate the email has required fields
    pub fn validate(&self) -> Result<()> {
        if self.from.is_empty() {
            return Err(LifecycleError::bad_request("Email 'from' is required"));
        }
        if self.to.is_empty() || self.to.iter().any(|t| t.trim().is_empty()) {
            return Err(LifecycleError::bad_request("Email 'to' is required"));
        }
        if self.subject.is_empty() {
            return Err(LifecycleError::bad_request("Email 'subject' is required"));
        }
        if self.text.is_none() && self.html.is_none() {
            return Err(LifecycleError::bad_request(
                "Email must have either 'text' or 'html' body",
            ));
        }
        Ok(())
    }
}

/// Email delivery backend.
///
/// Implement this for SMTP or a provider API.
///
/// # Example
///
/// ```rust,ignore
/// use taxflow::notify::{Email, Mailer};
/// use taxflow::{LifecycleError, Result};
/// use async_trait::async_trait;
///
/// struct ProviderMailer {
///     client: ProviderClient,
/// }
///
/// #[async_trait]
/// impl Mailer for ProviderMailer {
///     async fn send(&self, email: &Email) -> Result<()> {
///         email.validate()?;
///         self.client
///             .send(email)
///             .await
///             .map_err(|e| LifecycleError::transient(e.to_string()))
///     }
///
///     fn is_healthy(&self) -> bool {
///         true
///     }
/// }
/// ```
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send an email.
    ///
    /// # Errors
    ///
    /// `BadRequest` for an invalid message, `Transient` when the backend
    /// couldn't take it. [`MailerNotifier`](super::MailerNotifier) logs
    /// either and reports the notification as undelivered.
    async fn send(&self, email: &Email) -> Result<()>;

    /// Check if the mailer backend is healthy/connected
    fn is_healthy(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_body() {
        let email = Email::new("from@test.com", "to@test.com", "Subject");
        assert!(email.validate().is_err());
        assert!(email.clone().text("hi").validate().is_ok());
        assert!(email.html("<p>hi</p>").validate().is_ok());
    }

    #[test]
    fn test_validate_requires_recipient() {
        let email = Email::new("from@test.com", "", "Subject").text("hi");
        assert!(email.validate().is_err());
    }
}
