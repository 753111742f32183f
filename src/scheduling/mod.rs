//! The scheduling core
//!
//! - [`policy`] — turns (per-message delay, hourly cap) into an effective
//!   spacing between sends.
//! - [`planner`] — assigns every recipient in a batch an absolute send
//!   timestamp using that spacing.
//! - [`throttle`] — fixed-window per-user limit on scheduling requests,
//!   backed by the Redis counter store.
//! - [`gateway`] — persists records and hands delayed jobs to the queue.

pub mod gateway;
pub mod planner;
pub mod policy;
pub mod throttle;

pub use gateway::{BatchSubmission, NewMessage, SingleSubmission, SubmissionGateway};
pub use planner::{plan, BatchRequest, InvalidBatch, PlannedSend};
pub use policy::effective_spacing_ms;
pub use throttle::{RateLimitDecision, ScheduleThrottle, ThrottleError};
