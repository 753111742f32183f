//! Job submission gateway
//!
//! Turns validated scheduling requests into persisted records plus
//! delayed queue entries, one job per message. Each job carries enough
//! data for the worker to act without further lookups.
//!
//! Batch submission treats recipients independently: persistence and
//! enqueue happen per-recipient in list order, a recipient that fails is
//! logged and skipped, and the caller gets the count actually queued.
//! Earlier successes are never rolled back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use super::planner::{self, BatchRequest};
use crate::error::AppError;
use crate::jobs::{new_job_id, DelayedQueue, EmailJob};
use crate::models;

/// One single-message submission request.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain body
    pub body: String,
    /// Optional HTML body
    pub html: Option<String>,
    /// Target send time
    pub send_at: DateTime<Utc>,
}

/// Result of a single submission.
#[derive(Debug, Clone)]
pub struct SingleSubmission {
    /// The queue job id
    pub job_id: String,
    /// The persisted record id (equal to the job id)
    pub email_id: String,
}

/// Result of a batch submission.
#[derive(Debug, Clone, Copy)]
pub struct BatchSubmission {
    /// Recipients successfully persisted and queued
    pub queued: usize,
}

/// The submission gateway. Holds its collaborators explicitly; one
/// instance lives in the application state.
#[derive(Clone)]
pub struct SubmissionGateway {
    db: PgPool,
    queue: Arc<DelayedQueue>,
}

impl SubmissionGateway {
    /// Create a gateway over the database pool and the delayed queue.
    #[must_use]
    pub fn new(db: PgPool, queue: Arc<DelayedQueue>) -> Self {
        Self { db, queue }
    }

    /// Persist one message with status `pending` and enqueue its delayed
    /// job. A send time in the past fires immediately.
    ///
    /// # Errors
    ///
    /// Returns a database or queue error; a record whose enqueue failed
    /// stays `pending` and is surfaced as a server error.
    pub async fn submit_single(
        &self,
        user_id: Uuid,
        message: &NewMessage,
    ) -> Result<SingleSubmission, AppError> {
        let id = new_job_id(user_id, Utc::now());

        let record = models::email::insert_pending(
            &self.db,
            &models::NewEmail {
                id: &id,
                user_id,
                recipient: &message.to,
                subject: &message.subject,
                body: &message.body,
                html: message.html.as_deref(),
                scheduled_at: message.send_at,
            },
        )
        .await?;

        self.queue.add(
            EmailJob {
                id: id.clone(),
                user_id,
                to: message.to.clone(),
                subject: message.subject.clone(),
                body: message.body.clone(),
                html: message.html.clone(),
                scheduled_at: message.send_at,
            },
            message.send_at,
        )?;

        info!(job_id = %id, to = %message.to, scheduled_at = %message.send_at, "email scheduled");
        Ok(SingleSubmission {
            job_id: id,
            email_id: record.id,
        })
    }

    /// Plan a batch and submit every planned send independently.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] when the batch itself is invalid.
    /// Per-recipient persistence or enqueue failures do not fail the
    /// call — they reduce the reported count.
    pub async fn submit_batch(
        &self,
        user_id: Uuid,
        batch: &BatchRequest,
    ) -> Result<BatchSubmission, AppError> {
        let plan = planner::plan(batch)?;
        let total = plan.len();
        let mut queued = 0;

        for send in plan {
            let id = new_job_id(user_id, Utc::now());

            let inserted = models::email::insert_pending(
                &self.db,
                &models::NewEmail {
                    id: &id,
                    user_id,
                    recipient: &send.recipient,
                    subject: &batch.subject,
                    body: &batch.body,
                    html: batch.html.as_deref(),
                    scheduled_at: send.send_at,
                },
            )
            .await;
            if let Err(err) = inserted {
                warn!(job_id = %id, to = %send.recipient, error = %err, "batch recipient not persisted, skipping");
                continue;
            }

            let added = self.queue.add(
                EmailJob {
                    id: id.clone(),
                    user_id,
                    to: send.recipient.clone(),
                    subject: batch.subject.clone(),
                    body: batch.body.clone(),
                    html: batch.html.clone(),
                    scheduled_at: send.send_at,
                },
                send.send_at,
            );
            if let Err(err) = added {
                warn!(job_id = %id, to = %send.recipient, error = %err, "batch recipient not queued, skipping");
                continue;
            }

            queued += 1;
        }

        info!(user_id = %user_id, queued, total, "batch scheduled");
        Ok(BatchSubmission { queued })
    }
}
