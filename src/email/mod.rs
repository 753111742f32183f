//! Outbound email: message type, sender trait and backends
//!
//! The dispatch worker talks to a [`EmailSender`] trait object, so the
//! transport can be SMTP in production, the console backend in
//! development and a capturing mock in tests.

mod console;
mod error;
mod message;
mod sender;
mod smtp;

pub use console::ConsoleBackend;
pub use error::EmailError;
pub use message::Email;
pub use sender::EmailSender;
pub use smtp::SmtpBackend;
