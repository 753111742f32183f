//! The outbound message type.

use super::EmailError;

/// An outbound email message.
///
/// One recipient per message — a batch schedules one message per
/// recipient rather than one message with many recipients.
///
/// # Examples
///
/// ```rust
/// use mailflow::email::Email;
///
/// let email = Email::new()
///     .to("user@example.com")
///     .from("noreply@myapp.com")
///     .subject("Hello!")
///     .text("Hello, World!");
///
/// assert!(email.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Email {
    /// Recipient address
    pub to: String,
    /// Sender address
    pub from: Option<String>,
    /// Subject line
    pub subject: Option<String>,
    /// Plain text body
    pub text: Option<String>,
    /// HTML body
    pub html: Option<String>,
}

impl Email {
    /// Create an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recipient address.
    #[must_use]
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    /// Set the sender address.
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Set the subject line.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the plain text body.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Set the HTML body.
    #[must_use]
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Check the message is complete enough to send.
    ///
    /// # Errors
    ///
    /// Returns the first missing-field error: recipient, subject, then
    /// content (either text or HTML satisfies the content requirement).
    pub fn validate(&self) -> Result<(), EmailError> {
        if self.to.is_empty() {
            return Err(EmailError::NoRecipient);
        }
        if self.subject.as_deref().unwrap_or("").is_empty() {
            return Err(EmailError::NoSubject);
        }
        if self.text.is_none() && self.html.is_none() {
            return Err(EmailError::NoContent);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let email = Email::new()
            .to("user@example.com")
            .from("noreply@example.com")
            .subject("Test")
            .text("body")
            .html("<p>body</p>");

        assert_eq!(email.to, "user@example.com");
        assert_eq!(email.from.as_deref(), Some("noreply@example.com"));
        assert_eq!(email.subject.as_deref(), Some("Test"));
        assert!(email.validate().is_ok());
    }

    #[test]
    fn test_validate_missing_fields() {
        assert!(matches!(
            Email::new().validate(),
            Err(EmailError::NoRecipient)
        ));
        assert!(matches!(
            Email::new().to("user@example.com").validate(),
            Err(EmailError::NoSubject)
        ));
        assert!(matches!(
            Email::new().to("user@example.com").subject("s").validate(),
            Err(EmailError::NoContent)
        ));
    }

    #[test]
    fn test_html_only_is_valid_content() {
        let email = Email::new()
            .to("user@example.com")
            .subject("s")
            .html("<p>hi</p>");
        assert!(email.validate().is_ok());
    }
}
