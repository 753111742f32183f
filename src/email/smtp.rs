//! SMTP backend for sending emails
//!
//! Uses the `lettre` crate to send emails via SMTP servers.

use async_trait::async_trait;
use lettre::{
    message::{header, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use super::{Email, EmailError, EmailSender};
use crate::config::SmtpSettings;

/// SMTP email backend
///
/// The transport is built once at construction and reused for every send;
/// lettre pools connections internally.
pub struct SmtpBackend {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpBackend {
    /// Create a backend from SMTP settings.
    ///
    /// # Errors
    ///
    /// Returns [`EmailError::Config`] when credentials are missing and
    /// [`EmailError::Smtp`] when the relay cannot be configured.
    pub fn new(settings: &SmtpSettings) -> Result<Self, EmailError> {
        if !settings.is_configured() {
            return Err(EmailError::config("SMTP username is not set"));
        }

        let credentials =
            Credentials::new(settings.username.clone(), settings.password.clone());

        let builder = if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| EmailError::smtp(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };

        let transport = builder.credentials(credentials).port(settings.port).build();

        Ok(Self {
            transport,
            from: settings.from_address().to_string(),
        })
    }

    /// Build a lettre [`Message`] from an [`Email`].
    fn build_message(&self, email: &Email) -> Result<Message, EmailError> {
        email.validate()?;

        let from_addr = email.from.as_deref().unwrap_or(&self.from);
        let from: Mailbox = from_addr
            .parse()
            .map_err(|_| EmailError::InvalidAddress(from_addr.to_string()))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|_| EmailError::InvalidAddress(email.to.clone()))?;

        let subject = email.subject.as_deref().ok_or(EmailError::NoSubject)?;
        let builder = Message::builder().from(from).to(to).subject(subject);

        let message = match (&email.html, &email.text) {
            (Some(html), Some(text)) => builder
                .multipart(
                    MultiPart::alternative()
                        .singlepart(
                            SinglePart::builder()
                                .header(header::ContentType::TEXT_PLAIN)
                                .body(text.clone()),
                        )
                        .singlepart(
                            SinglePart::builder()
                                .header(header::ContentType::TEXT_HTML)
                                .body(html.clone()),
                        ),
                )
                .map_err(|e| EmailError::smtp(e.to_string()))?,
            (Some(html), None) => builder
                .header(header::ContentType::TEXT_HTML)
                .body(html.clone())
                .map_err(|e| EmailError::smtp(e.to_string()))?,
            (None, Some(text)) => builder
                .header(header::ContentType::TEXT_PLAIN)
                .body(text.clone())
                .map_err(|e| EmailError::smtp(e.to_string()))?,
            (None, None) => return Err(EmailError::NoContent),
        };

        Ok(message)
    }
}

#[async_trait]
impl EmailSender for SmtpBackend {
    async fn send(&self, email: Email) -> Result<(), EmailError> {
        let message = self.build_message(&email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| EmailError::smtp(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SmtpBackend {
        let settings = SmtpSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "sender@example.com".to_string(),
            password: "password123".to_string(),
            use_tls: false,
            from: String::new(),
        };
        SmtpBackend::new(&settings).unwrap()
    }

    #[test]
    fn test_unconfigured_settings_rejected() {
        let result = SmtpBackend::new(&SmtpSettings::default());
        assert!(matches!(result, Err(EmailError::Config(_))));
    }

    #[tokio::test]
    async fn test_build_message_uses_default_from() {
        let email = Email::new()
            .to("recipient@example.com")
            .subject("Test Email")
            .text("This is a test email");

        assert!(backend().build_message(&email).is_ok());
    }

    #[tokio::test]
    async fn test_build_message_with_html_and_text() {
        let email = Email::new()
            .to("recipient@example.com")
            .subject("Test Email")
            .text("This is plain text")
            .html("<h1>This is HTML</h1>");

        assert!(backend().build_message(&email).is_ok());
    }

    #[tokio::test]
    async fn test_build_message_invalid_recipient() {
        let email = Email::new()
            .to("not an address")
            .subject("Test Email")
            .text("body");

        assert!(matches!(
            backend().build_message(&email),
            Err(EmailError::InvalidAddress(_))
        ));
    }
}
