//! Dispatch worker
//!
//! Consumes due jobs from the delayed queue with bounded concurrency.
//! Each slot processes one job end-to-end: transport call under a hard
//! timeout, then the status update. The persisted record always reflects
//! the most recent attempt's outcome — a retry that later succeeds
//! overwrites an earlier `failed` with `sent`.
//!
//! Failures are reported back to the queue so its retry/backoff policy
//! applies; the worker itself never decides whether to retry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use super::queue::{DelayedQueue, RetryOutcome};
use super::{EmailJob, JobError};
use crate::email::{Email, EmailSender};
use crate::models;

/// How long an idle worker sleeps when the queue is empty. Wakeups from
/// the queue cut this short.
const IDLE_POLL: Duration = Duration::from_secs(30);

/// Where delivery outcomes are recorded.
///
/// A seam so the worker can be exercised in tests without a database.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Overwrite the record's status with `sent` and stamp the send time.
    async fn mark_sent(&self, id: &str, sent_at: DateTime<Utc>) -> Result<(), sqlx::Error>;

    /// Overwrite the record's status with `failed`.
    async fn mark_failed(&self, id: &str) -> Result<(), sqlx::Error>;
}

/// PostgreSQL-backed status store.
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    /// Create a store over a connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn mark_sent(&self, id: &str, sent_at: DateTime<Utc>) -> Result<(), sqlx::Error> {
        models::email::mark_sent(&self.pool, id, sent_at).await
    }

    async fn mark_failed(&self, id: &str) -> Result<(), sqlx::Error> {
        models::email::mark_failed(&self.pool, id).await
    }
}

/// The dispatch worker pool.
pub struct DispatchWorker {
    queue: Arc<DelayedQueue>,
    sender: Arc<dyn EmailSender>,
    store: Arc<dyn StatusStore>,
    concurrency: usize,
    send_timeout: Duration,
}

/// Handle to a spawned worker; shutting down waits for in-flight jobs.
pub struct WorkerHandle {
    task: tokio::task::JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl WorkerHandle {
    /// Stop taking new jobs and wait for in-flight ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "worker task did not shut down cleanly");
        }
    }
}

impl DispatchWorker {
    /// Create a worker pool over a queue, transport and status store.
    #[must_use]
    pub fn new(
        queue: Arc<DelayedQueue>,
        sender: Arc<dyn EmailSender>,
        store: Arc<dyn StatusStore>,
        concurrency: usize,
        send_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            sender,
            store,
            concurrency,
            send_timeout,
        }
    }

    /// Spawn the worker loop.
    #[must_use]
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(concurrency = self.concurrency, "email worker started");
        let task = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle {
            task,
            shutdown: shutdown_tx,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let slots = Arc::new(Semaphore::new(self.concurrency));

        loop {
            for job in self.queue.claim_due(Utc::now()) {
                let Ok(permit) = slots.clone().acquire_owned().await else {
                    return;
                };
                let queue = self.queue.clone();
                let sender = self.sender.clone();
                let store = self.store.clone();
                let send_timeout = self.send_timeout;
                tokio::spawn(async move {
                    process_job(&job, &queue, sender.as_ref(), store.as_ref(), send_timeout)
                        .await;
                    drop(permit);
                });
            }

            let wait = self
                .queue
                .time_until_next(Utc::now())
                .unwrap_or(IDLE_POLL)
                .min(IDLE_POLL);
            tokio::select! {
                () = self.queue.changed() => {}
                () = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Wait for in-flight slots to drain before returning.
        let _ = slots.acquire_many(self.concurrency as u32).await;
        info!("email worker stopped");
    }
}

/// Run one claimed job: deliver, then settle the outcome with the queue.
async fn process_job(
    job: &EmailJob,
    queue: &DelayedQueue,
    sender: &dyn EmailSender,
    store: &dyn StatusStore,
    send_timeout: Duration,
) {
    info!(job_id = %job.id, to = %job.to, "processing email job");

    match attempt_delivery(job, sender, store, send_timeout).await {
        Ok(()) => {
            queue.complete(&job.id);
            info!(job_id = %job.id, "email job completed");
        }
        Err(err) => {
            warn!(job_id = %job.id, error = %err, "email job attempt failed");
            match queue.fail_attempt(&job.id, err.to_string(), Utc::now()) {
                RetryOutcome::Retrying { attempt, retry_in } => {
                    debug!(job_id = %job.id, attempt, retry_in = ?retry_in, "job rescheduled");
                }
                RetryOutcome::Exhausted { attempts } => {
                    error!(job_id = %job.id, attempts, "email job failed permanently");
                }
                RetryOutcome::Missing => {
                    warn!(job_id = %job.id, "failed job was not in the queue");
                }
            }
        }
    }
}

/// One delivery attempt: transport call under the hard timeout, then the
/// status update reflecting this attempt's outcome.
///
/// A timeout is indistinguishable from a transport error for retry
/// purposes.
///
/// # Errors
///
/// Returns [`JobError::Delivery`] or [`JobError::Timeout`] so the caller
/// can advance the queue's retry counter.
pub async fn attempt_delivery(
    job: &EmailJob,
    sender: &dyn EmailSender,
    store: &dyn StatusStore,
    send_timeout: Duration,
) -> Result<(), JobError> {
    let email = Email::new()
        .to(&job.to)
        .subject(&job.subject)
        .text(&job.body)
        .html(job.html.clone().unwrap_or_else(|| job.body.clone()));

    let result = match tokio::time::timeout(send_timeout, sender.send(email)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(JobError::Delivery(err.to_string())),
        Err(_) => Err(JobError::Timeout(send_timeout)),
    };

    match &result {
        Ok(()) => {
            if let Err(err) = store.mark_sent(&job.id, Utc::now()).await {
                error!(job_id = %job.id, error = %err, "failed to record sent status");
            }
        }
        Err(_) => {
            if let Err(err) = store.mark_failed(&job.id).await {
                error!(job_id = %job.id, error = %err, "failed to record failed status");
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{QueueEvent, RetryPolicy};
    use crate::testing::{MemoryStatusStore, MockEmailSender};
    use uuid::Uuid;

    fn job(id: &str) -> EmailJob {
        EmailJob {
            id: id.to_string(),
            user_id: Uuid::new_v4(),
            to: "user@example.com".to_string(),
            subject: "Subject".to_string(),
            body: "Body".to_string(),
            html: None,
            scheduled_at: Utc::now(),
        }
    }

    fn harness(
        sender: MockEmailSender,
    ) -> (Arc<DelayedQueue>, Arc<MemoryStatusStore>, WorkerHandle) {
        // short backoff so retry scenarios finish quickly
        let queue = Arc::new(DelayedQueue::new(
            "test_jobs",
            RetryPolicy::new(3, Duration::from_millis(20)),
            None,
        ));
        let store = Arc::new(MemoryStatusStore::new());
        let worker = DispatchWorker::new(
            queue.clone(),
            Arc::new(sender),
            store.clone(),
            5,
            Duration::from_millis(200),
        );
        let handle = worker.spawn();
        (queue, store, handle)
    }

    #[tokio::test]
    async fn test_successful_job_marked_sent() {
        let sender = MockEmailSender::new();
        let (queue, store, handle) = harness(sender.clone());
        let mut events = queue.subscribe();

        queue.add(job("j1"), Utc::now()).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("job should settle")
            .unwrap();
        assert_eq!(
            event,
            QueueEvent::Completed {
                job_id: "j1".to_string()
            }
        );
        assert_eq!(store.status_of("j1").as_deref(), Some("sent"));
        assert_eq!(sender.sent_count(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_fail_twice_then_succeed_ends_sent() {
        let sender = MockEmailSender::failing_times(2);
        let (queue, store, handle) = harness(sender.clone());
        let mut events = queue.subscribe();

        queue.add(job("j1"), Utc::now()).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("job should settle within the retry budget")
            .unwrap();
        assert_eq!(
            event,
            QueueEvent::Completed {
                job_id: "j1".to_string()
            }
        );
        // status reflects the last attempt, not the earlier failures
        assert_eq!(store.status_of("j1").as_deref(), Some("sent"));
        assert_eq!(sender.attempt_count(), 3);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_end_failed() {
        let sender = MockEmailSender::always_failing();
        let (queue, store, handle) = harness(sender.clone());
        let mut events = queue.subscribe();

        queue.add(job("j1"), Utc::now()).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("job should settle after exhausting retries")
            .unwrap();
        assert_eq!(
            event,
            QueueEvent::Failed {
                job_id: "j1".to_string(),
                reason: "delivery failed: SMTP error: scripted failure".to_string()
            }
        );
        assert_eq!(store.status_of("j1").as_deref(), Some("failed"));
        assert_eq!(sender.attempt_count(), 3);

        // no fourth attempt
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sender.attempt_count(), 3);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_transport_timeout_is_a_failure() {
        let sender = MockEmailSender::hanging();
        let store = MemoryStatusStore::new();
        let result = attempt_delivery(
            &job("j1"),
            &sender,
            &store,
            Duration::from_millis(20),
        )
        .await;

        assert!(matches!(result, Err(JobError::Timeout(_))));
        assert_eq!(store.status_of("j1").as_deref(), Some("failed"));
    }

    #[tokio::test]
    async fn test_html_falls_back_to_body() {
        let sender = MockEmailSender::new();
        let store = MemoryStatusStore::new();
        let mut j = job("j1");
        j.html = None;
        attempt_delivery(&j, &sender, &store, Duration::from_secs(1))
            .await
            .unwrap();

        let email = sender.last_sent().unwrap();
        assert_eq!(email.html.as_deref(), Some("Body"));
        assert_eq!(email.text.as_deref(), Some("Body"));
    }
}
