//! mailflow: an email-scheduling web service.
//!
//! Users register, compose or batch-upload recipient lists and pick a send
//! time; the service persists each message, enqueues a delayed job and a
//! worker pool later delivers it over SMTP, pushing the outcome to the
//! owner's dashboard over WebSocket.
//!
//! # Architecture
//!
//! - [`scheduling`] — the scheduling core: spacing policy, batch planner,
//!   per-user request throttle and the job submission gateway.
//! - [`jobs`] — delayed job queue (in-memory delayed heap with a
//!   write-behind Redis mirror) and the dispatch worker pool.
//! - [`email`] — the outbound message type, the [`email::EmailSender`]
//!   trait and its SMTP/console backends.
//! - [`notify`] — per-user connection registry and the queue-event
//!   listener that fans job outcomes out to live dashboards.
//! - [`handlers`] — the REST and WebSocket surface.
//!
//! All services are constructed explicitly in `main` and handed to the
//! components that use them; there are no module-level singletons.

pub mod auth;
pub mod config;
pub mod email;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod observability;
pub mod scheduling;
pub mod state;

#[cfg(test)]
pub mod testing;
