//! Persistence: row types and queries
//!
//! Runtime (non-macro) sqlx queries against PostgreSQL. One module per
//! table.

pub mod email;
pub mod template;
pub mod user;

pub use email::{DailyStat, EmailStatus, ListFilter, NewEmail, ScheduledEmail};
pub use template::Template;
pub use user::User;
