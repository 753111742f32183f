//! The transport seam.

use async_trait::async_trait;

use super::{Email, EmailError};

/// Something that can deliver an [`Email`].
///
/// Implemented by [`super::SmtpBackend`] for production, by
/// [`super::ConsoleBackend`] for development and by the capturing mock in
/// tests.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message, or fail.
    ///
    /// # Errors
    ///
    /// Returns [`EmailError`] when the message is invalid or the
    /// transport rejects it. Callers treat any error (including their own
    /// timeout) as a failed delivery attempt.
    async fn send(&self, email: Email) -> Result<(), EmailError>;
}
