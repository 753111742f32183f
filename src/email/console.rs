//! Console backend for development
//!
//! Logs emails instead of sending them. Used automatically when no SMTP
//! credentials are configured.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Email, EmailError, EmailSender};

/// Console email backend for development
#[derive(Debug, Clone, Default)]
pub struct ConsoleBackend;

impl ConsoleBackend {
    /// Create a new console backend
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmailSender for ConsoleBackend {
    async fn send(&self, email: Email) -> Result<(), EmailError> {
        email.validate()?;

        info!(
            to = %email.to,
            subject = email.subject.as_deref().unwrap_or(""),
            "console email sent"
        );

        if let Some(text) = &email.text {
            debug!(text = %text, "email text content");
        }
        if let Some(html) = &email.html {
            debug!(html = %html, "email HTML content");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_valid_email() {
        let backend = ConsoleBackend::new();
        let email = Email::new()
            .to("user@example.com")
            .subject("Test")
            .text("Hello");
        assert!(backend.send(email).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_invalid_email_fails() {
        let backend = ConsoleBackend::new();
        assert!(backend.send(Email::new()).await.is_err());
    }
}
