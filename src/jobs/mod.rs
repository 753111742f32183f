//! Delayed job queue and dispatch worker
//!
//! The queue keeps its working state in memory — a min-heap of due times
//! plus one record per job — and mirrors every transition to Redis with
//! fire-and-forget writes, so fast enqueue never waits on IO and delayed
//! jobs survive a restart (see [`queue::DelayedQueue::restore`]).
//!
//! Lifecycle: a job is added with an absolute run time, claimed by the
//! worker once that time passes, and settles as completed (record removed,
//! counted) or failed (record retained for inspection) after the retry
//! budget runs out. Completed/failed transitions are published on a
//! broadcast channel that the status notifier — not the worker — consumes.

pub mod queue;
pub mod worker;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use queue::{DelayedQueue, JobSnapshot, QueueStats};
pub use worker::{DispatchWorker, PgStatusStore, StatusStore, WorkerHandle};

/// Payload of one delayed email job.
///
/// Carries everything the worker needs to act without further lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailJob {
    /// Job id, equal to the persisted email record's id
    pub id: String,
    /// Owning user
    pub user_id: Uuid,
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain body
    pub body: String,
    /// Optional HTML body
    pub html: Option<String>,
    /// Target send time
    pub scheduled_at: DateTime<Utc>,
}

/// Queue-side state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for its run time
    Delayed,
    /// Claimed by a worker slot
    Active,
    /// Delivered; the record is removed and only counted
    Completed,
    /// Retry budget exhausted; the record is retained for inspection
    Failed,
}

impl JobState {
    /// Whether no further transitions can occur.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Lowercase name, as exposed over the API.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Lifecycle event published when a job settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// The job was delivered and removed from the queue.
    Completed {
        /// Job id
        job_id: String,
    },
    /// The job exhausted its retry budget.
    Failed {
        /// Job id
        job_id: String,
        /// Final error message
        reason: String,
    },
}

/// Job queue and delivery errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// A live job with this id is already queued
    #[error("job {0} is already queued")]
    AlreadyQueued(String),

    /// No job with this id
    #[error("job not found: {0}")]
    NotFound(String),

    /// The mail transport rejected the message
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The transport call exceeded its hard timeout
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// Payload (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Mirror store error
    #[error("queue store error: {0}")]
    Store(String),
}

/// Retry policy: a fixed attempt budget with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total delivery attempts per job
    pub max_attempts: u32,
    /// Backoff after the first failure; doubles per subsequent failure
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts,
            backoff_base,
        }
    }

    /// Delay before the next attempt, given how many attempts have already
    /// failed. `None` once the budget is spent.
    #[must_use]
    pub fn next_delay(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts == 0 || failed_attempts >= self.max_attempts {
            return None;
        }
        Some(self.backoff_base * 2u32.pow(failed_attempts - 1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Build a job id that encodes its owner: `{owner}-{millis}-{suffix}`.
///
/// The random suffix keeps ids unique even for batch items created within
/// the same millisecond. The owner segment uses the simple (hyphen-free)
/// UUID form so it is recoverable with [`owner_of`].
#[must_use]
pub fn new_job_id(owner: Uuid, now: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{:04x}",
        owner.simple(),
        now.timestamp_millis(),
        rand::random::<u16>()
    )
}

/// Recover the owning user id from a job id's encoding.
#[must_use]
pub fn owner_of(job_id: &str) -> Option<Uuid> {
    job_id
        .split('-')
        .next()
        .and_then(|segment| Uuid::parse_str(segment).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_delay(3), None);
        assert_eq!(policy.next_delay(4), None);
    }

    #[test]
    fn test_retry_policy_zero_attempts_is_spent() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        assert_eq!(policy.next_delay(0), None);
    }

    #[test]
    fn test_job_id_encodes_owner() {
        let owner = Uuid::new_v4();
        let id = new_job_id(owner, Utc::now());
        assert_eq!(owner_of(&id), Some(owner));
    }

    #[test]
    fn test_job_ids_unique_within_one_millisecond() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let ids: std::collections::HashSet<_> =
            (0..64).map(|_| new_job_id(owner, now)).collect();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn test_owner_of_rejects_garbage() {
        assert_eq!(owner_of("not-a-job-id"), None);
        assert_eq!(owner_of(""), None);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(JobState::Delayed.name(), "delayed");
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(!JobState::Active.is_terminal());
    }
}
