//! The delayed queue
//!
//! Working state lives in memory: a min-heap ordered by run time plus a
//! record map keyed by job id. Every transition is mirrored to Redis with
//! fire-and-forget writes so the enqueue path never waits on IO; the
//! mirror is read back once at startup by [`DelayedQueue::restore`].
//!
//! Redis layout, under the configured queue name as prefix:
//!
//! | key | contents |
//! |---|---|
//! | `{name}:jobs:{id}` | hash: payload, state, attempts, run_at, error |
//! | `{name}:scheduled` | zset of non-terminal job ids scored by run time |
//! | `{name}:failed` | set of terminally failed job ids |
//! | `{name}:completed` | counter of completed jobs |

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use deadpool_redis::Pool as RedisPool;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, warn};

use super::{EmailJob, JobError, JobState, QueueEvent, RetryPolicy};

/// One queued job and its lifecycle bookkeeping.
#[derive(Debug, Clone)]
struct JobRecord {
    job: EmailJob,
    state: JobState,
    /// Attempts started so far (incremented on claim).
    attempts: u32,
    run_at: DateTime<Utc>,
    last_error: Option<String>,
}

/// Heap entry; `Reverse` turns the max-heap into earliest-first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DelayedEntry {
    run_at: DateTime<Utc>,
    id: String,
}

#[derive(Debug, Default)]
struct QueueInner {
    delayed: BinaryHeap<Reverse<DelayedEntry>>,
    records: HashMap<String, JobRecord>,
    completed: u64,
}

/// Point-in-time view of one job, as exposed over the API.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    /// Job id
    pub id: String,
    /// Queue state name; a delayed job whose run time has passed reports
    /// `waiting`
    pub state: String,
    /// Attempts started so far
    pub attempts: u32,
    /// Last delivery error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Job payload
    pub data: EmailJob,
}

/// Queue counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Due but not yet claimed
    pub waiting: u64,
    /// Claimed by a worker slot
    pub active: u64,
    /// Delivered
    pub completed: u64,
    /// Terminally failed
    pub failed: u64,
    /// Waiting for a future run time
    pub delayed: u64,
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Re-scheduled with backoff.
    Retrying {
        /// The attempt that just failed
        attempt: u32,
        /// Delay before the next attempt
        retry_in: Duration,
    },
    /// Retry budget spent; the job is terminally failed.
    Exhausted {
        /// Attempts made in total
        attempts: u32,
    },
    /// No record with this id.
    Missing,
}

/// Delayed job queue with a write-behind Redis mirror.
pub struct DelayedQueue {
    name: String,
    inner: Mutex<QueueInner>,
    wakeup: Notify,
    events: broadcast::Sender<QueueEvent>,
    retry: RetryPolicy,
    mirror: Option<RedisPool>,
}

impl DelayedQueue {
    /// Create a queue. `mirror` is optional; without it the queue is
    /// purely in-memory (tests, single-shot tools).
    #[must_use]
    pub fn new(name: impl Into<String>, retry: RetryPolicy, mirror: Option<RedisPool>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            name: name.into(),
            inner: Mutex::new(QueueInner::default()),
            wakeup: Notify::new(),
            events,
            retry,
            mirror,
        }
    }

    /// Subscribe to completed/failed lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// The configured retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a job to fire at `run_at` (a past time fires immediately).
    ///
    /// # Errors
    ///
    /// Returns [`JobError::AlreadyQueued`] if any job with this id is
    /// already known to the queue — duplicate ids are rejected, not
    /// merged.
    pub fn add(&self, job: EmailJob, run_at: DateTime<Utc>) -> Result<(), JobError> {
        let record = {
            let mut inner = self.lock();
            if inner.records.contains_key(&job.id) {
                return Err(JobError::AlreadyQueued(job.id));
            }
            let record = JobRecord {
                job,
                state: JobState::Delayed,
                attempts: 0,
                run_at,
                last_error: None,
            };
            inner.delayed.push(Reverse(DelayedEntry {
                run_at,
                id: record.job.id.clone(),
            }));
            inner.records.insert(record.job.id.clone(), record.clone());
            record
        };

        debug!(job_id = %record.job.id, run_at = %run_at, "job enqueued");
        self.mirror_enqueue(&record);
        self.wakeup.notify_one();
        Ok(())
    }

    /// Claim every job whose run time has passed, marking it active and
    /// starting its next attempt.
    #[must_use]
    pub fn claim_due(&self, now: DateTime<Utc>) -> Vec<EmailJob> {
        let mut claimed = Vec::new();
        {
            let mut inner = self.lock();
            while let Some(Reverse(entry)) = inner.delayed.peek() {
                if entry.run_at > now {
                    break;
                }
                let Some(Reverse(entry)) = inner.delayed.pop() else {
                    break;
                };
                let Some(record) = inner.records.get_mut(&entry.id) else {
                    continue; // stale heap entry
                };
                if record.state != JobState::Delayed || record.run_at != entry.run_at {
                    continue; // superseded by a retry reschedule
                }
                record.state = JobState::Active;
                record.attempts += 1;
                claimed.push((record.job.clone(), record.attempts));
            }
        }

        for (job, attempts) in &claimed {
            self.mirror_activate(&job.id, *attempts);
        }
        claimed.into_iter().map(|(job, _)| job).collect()
    }

    /// Settle a job as delivered: the record is removed (kept only as a
    /// counter) and a [`QueueEvent::Completed`] is published.
    pub fn complete(&self, job_id: &str) {
        let removed = {
            let mut inner = self.lock();
            let removed = inner.records.remove(job_id);
            if removed.is_some() {
                inner.completed += 1;
            }
            removed
        };

        if removed.is_none() {
            warn!(job_id, "completed job was not in the queue");
            return;
        }

        self.mirror_complete(job_id);
        let _ = self.events.send(QueueEvent::Completed {
            job_id: job_id.to_string(),
        });
    }

    /// Record a failed attempt. Reschedules with exponential backoff while
    /// the retry budget lasts; afterwards the job settles as failed, the
    /// record is retained for inspection and a [`QueueEvent::Failed`] is
    /// published.
    pub fn fail_attempt(&self, job_id: &str, error: String, now: DateTime<Utc>) -> RetryOutcome {
        let (outcome, mirror_retry) = {
            let mut inner = self.lock();
            let Some(record) = inner.records.get_mut(job_id) else {
                return RetryOutcome::Missing;
            };
            record.last_error = Some(error.clone());
            let attempts = record.attempts;

            if let Some(delay) = self.retry.next_delay(attempts) {
                let run_at = now
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                record.state = JobState::Delayed;
                record.run_at = run_at;
                inner.delayed.push(Reverse(DelayedEntry {
                    run_at,
                    id: job_id.to_string(),
                }));
                (
                    RetryOutcome::Retrying {
                        attempt: attempts,
                        retry_in: delay,
                    },
                    Some((run_at, attempts)),
                )
            } else {
                record.state = JobState::Failed;
                (RetryOutcome::Exhausted { attempts }, None)
            }
        };

        match (&outcome, mirror_retry) {
            (RetryOutcome::Retrying { .. }, Some((run_at, attempts))) => {
                self.mirror_retry(job_id, run_at, attempts, &error);
                self.wakeup.notify_one();
            }
            (RetryOutcome::Exhausted { .. }, _) => {
                self.mirror_fail(job_id, &error);
                let _ = self.events.send(QueueEvent::Failed {
                    job_id: job_id.to_string(),
                    reason: error,
                });
            }
            _ => {}
        }
        outcome
    }

    /// Look up one job.
    #[must_use]
    pub fn get(&self, job_id: &str, now: DateTime<Utc>) -> Option<JobSnapshot> {
        let inner = self.lock();
        inner.records.get(job_id).map(|record| JobSnapshot {
            id: record.job.id.clone(),
            state: snapshot_state(record, now).to_string(),
            attempts: record.attempts,
            error: record.last_error.clone(),
            data: record.job.clone(),
        })
    }

    /// Queue counts by state.
    #[must_use]
    pub fn stats(&self, now: DateTime<Utc>) -> QueueStats {
        let inner = self.lock();
        let mut stats = QueueStats {
            completed: inner.completed,
            ..QueueStats::default()
        };
        for record in inner.records.values() {
            match record.state {
                JobState::Delayed if record.run_at <= now => stats.waiting += 1,
                JobState::Delayed => stats.delayed += 1,
                JobState::Active => stats.active += 1,
                JobState::Failed => stats.failed += 1,
                JobState::Completed => {}
            }
        }
        stats
    }

    /// Time until the earliest delayed job is due; `None` when nothing is
    /// delayed.
    #[must_use]
    pub fn time_until_next(&self, now: DateTime<Utc>) -> Option<Duration> {
        let inner = self.lock();
        inner.delayed.peek().map(|Reverse(entry)| {
            (entry.run_at - now).to_std().unwrap_or(Duration::ZERO)
        })
    }

    /// Wait until the queue contents change (new job or retry reschedule).
    pub async fn changed(&self) {
        self.wakeup.notified().await;
    }

    /// Reload still-scheduled jobs from the Redis mirror. Jobs that were
    /// mid-flight at crash time come back as delayed with a past run time
    /// and fire immediately.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Store`] when the mirror cannot be read.
    pub async fn restore(&self) -> Result<usize, JobError> {
        let Some(pool) = &self.mirror else {
            return Ok(0);
        };
        let mut conn = connect(pool).await?;

        let entries: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(self.key("scheduled"))
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut *conn)
            .await
            .map_err(store_err)?;

        let mut restored = 0;
        for (id, score) in entries {
            let (payload, attempts): (Option<String>, Option<u32>) = redis::cmd("HMGET")
                .arg(self.job_key(&id))
                .arg("payload")
                .arg("attempts")
                .query_async(&mut *conn)
                .await
                .map_err(store_err)?;
            let Some(payload) = payload else {
                warn!(job_id = %id, "scheduled job has no mirror record, skipping");
                continue;
            };
            let job: EmailJob = match serde_json::from_str(&payload) {
                Ok(job) => job,
                Err(err) => {
                    warn!(job_id = %id, error = %err, "unreadable job payload, skipping");
                    continue;
                }
            };
            let run_at =
                DateTime::from_timestamp_millis(score as i64).unwrap_or_else(Utc::now);

            let mut inner = self.lock();
            if inner.records.contains_key(&id) {
                continue;
            }
            inner.delayed.push(Reverse(DelayedEntry {
                run_at,
                id: id.clone(),
            }));
            inner.records.insert(
                id.clone(),
                JobRecord {
                    job,
                    state: JobState::Delayed,
                    attempts: attempts.unwrap_or(0),
                    run_at,
                    last_error: None,
                },
            );
            restored += 1;
        }

        if restored > 0 {
            self.wakeup.notify_one();
        }
        Ok(restored)
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.name, suffix)
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}:jobs:{}", self.name, id)
    }

    // Mirror writes are fire-and-forget: the in-memory queue is
    // authoritative and a failed write only degrades crash recovery.

    fn mirror_enqueue(&self, record: &JobRecord) {
        let Some(pool) = self.mirror.clone() else {
            return;
        };
        let payload = match serde_json::to_string(&record.job) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(job_id = %record.job.id, error = %err, "unserializable job payload");
                return;
            }
        };
        let job_key = self.job_key(&record.job.id);
        let zset = self.key("scheduled");
        let id = record.job.id.clone();
        let run_at = record.run_at.timestamp_millis();
        self.spawn_mirror("enqueue", &record.job.id, async move {
            let mut conn = connect(&pool).await?;
            let _: () = redis::cmd("HSET")
                .arg(&job_key)
                .arg("payload")
                .arg(payload)
                .arg("state")
                .arg(JobState::Delayed.name())
                .arg("attempts")
                .arg(0)
                .arg("run_at")
                .arg(run_at)
                .query_async(&mut *conn)
                .await
                .map_err(store_err)?;
            redis::cmd("ZADD")
                .arg(&zset)
                .arg(run_at)
                .arg(&id)
                .query_async(&mut *conn)
                .await
                .map_err(store_err)
        });
    }

    fn mirror_activate(&self, job_id: &str, attempts: u32) {
        let Some(pool) = self.mirror.clone() else {
            return;
        };
        let job_key = self.job_key(job_id);
        self.spawn_mirror("activate", job_id, async move {
            let mut conn = connect(&pool).await?;
            redis::cmd("HSET")
                .arg(&job_key)
                .arg("state")
                .arg(JobState::Active.name())
                .arg("attempts")
                .arg(attempts)
                .query_async(&mut *conn)
                .await
                .map_err(store_err)
        });
    }

    fn mirror_retry(&self, job_id: &str, run_at: DateTime<Utc>, attempts: u32, error: &str) {
        let Some(pool) = self.mirror.clone() else {
            return;
        };
        let job_key = self.job_key(job_id);
        let zset = self.key("scheduled");
        let id = job_id.to_string();
        let error = error.to_string();
        let run_at = run_at.timestamp_millis();
        self.spawn_mirror("retry", job_id, async move {
            let mut conn = connect(&pool).await?;
            let _: () = redis::cmd("HSET")
                .arg(&job_key)
                .arg("state")
                .arg(JobState::Delayed.name())
                .arg("attempts")
                .arg(attempts)
                .arg("run_at")
                .arg(run_at)
                .arg("error")
                .arg(error)
                .query_async(&mut *conn)
                .await
                .map_err(store_err)?;
            redis::cmd("ZADD")
                .arg(&zset)
                .arg(run_at)
                .arg(&id)
                .query_async(&mut *conn)
                .await
                .map_err(store_err)
        });
    }

    fn mirror_complete(&self, job_id: &str) {
        let Some(pool) = self.mirror.clone() else {
            return;
        };
        let job_key = self.job_key(job_id);
        let zset = self.key("scheduled");
        let counter = self.key("completed");
        let id = job_id.to_string();
        self.spawn_mirror("complete", job_id, async move {
            let mut conn = connect(&pool).await?;
            let _: () = redis::cmd("DEL")
                .arg(&job_key)
                .query_async(&mut *conn)
                .await
                .map_err(store_err)?;
            let _: () = redis::cmd("ZREM")
                .arg(&zset)
                .arg(&id)
                .query_async(&mut *conn)
                .await
                .map_err(store_err)?;
            redis::cmd("INCR")
                .arg(&counter)
                .query_async(&mut *conn)
                .await
                .map_err(store_err)
        });
    }

    fn mirror_fail(&self, job_id: &str, error: &str) {
        let Some(pool) = self.mirror.clone() else {
            return;
        };
        let job_key = self.job_key(job_id);
        let zset = self.key("scheduled");
        let failed = self.key("failed");
        let id = job_id.to_string();
        let error = error.to_string();
        self.spawn_mirror("fail", job_id, async move {
            let mut conn = connect(&pool).await?;
            let _: () = redis::cmd("HSET")
                .arg(&job_key)
                .arg("state")
                .arg(JobState::Failed.name())
                .arg("error")
                .arg(error)
                .query_async(&mut *conn)
                .await
                .map_err(store_err)?;
            let _: () = redis::cmd("ZREM")
                .arg(&zset)
                .arg(&id)
                .query_async(&mut *conn)
                .await
                .map_err(store_err)?;
            redis::cmd("SADD")
                .arg(&failed)
                .arg(&id)
                .query_async(&mut *conn)
                .await
                .map_err(store_err)
        });
    }

    fn spawn_mirror<F>(&self, op: &'static str, job_id: &str, fut: F)
    where
        F: std::future::Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = fut.await {
                warn!(op, job_id = %job_id, error = %err, "queue mirror write failed");
            }
        });
    }
}

fn snapshot_state(record: &JobRecord, now: DateTime<Utc>) -> &'static str {
    match record.state {
        JobState::Delayed if record.run_at <= now => "waiting",
        state => state.name(),
    }
}

async fn connect(pool: &RedisPool) -> Result<deadpool_redis::Connection, JobError> {
    pool.get().await.map_err(|e| JobError::Store(e.to_string()))
}

fn store_err(err: redis::RedisError) -> JobError {
    JobError::Store(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn queue() -> DelayedQueue {
        DelayedQueue::new("test_jobs", RetryPolicy::default(), None)
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let queue = queue();
        let now = Utc::now();
        queue.add(job("j1"), now).unwrap();
        assert!(matches!(
            queue.add(job("j1"), now),
            Err(JobError::AlreadyQueued(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_only_due_jobs() {
        let queue = queue();
        let now = Utc::now();
        queue.add(job("due"), now - chrono::Duration::seconds(1)).unwrap();
        queue.add(job("future"), now + chrono::Duration::seconds(60)).unwrap();

        let claimed = queue.claim_due(now);
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, "due");

        // claimed jobs are active, not claimable again
        assert!(queue.claim_due(now).is_empty());
        let stats = queue.stats(now);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.delayed, 1);
    }

    #[tokio::test]
    async fn test_claim_order_is_earliest_first() {
        let queue = queue();
        let now = Utc::now();
        queue.add(job("second"), now - chrono::Duration::seconds(1)).unwrap();
        queue.add(job("first"), now - chrono::Duration::seconds(5)).unwrap();

        let claimed = queue.claim_due(now);
        assert_eq!(claimed[0].id, "first");
        assert_eq!(claimed[1].id, "second");
    }

    #[tokio::test]
    async fn test_complete_removes_record_and_emits() {
        let queue = queue();
        let mut events = queue.subscribe();
        let now = Utc::now();
        queue.add(job("j1"), now).unwrap();
        let _ = queue.claim_due(now);

        queue.complete("j1");

        assert!(queue.get("j1", now).is_none());
        assert_eq!(queue.stats(now).completed, 1);
        assert_eq!(
            events.try_recv().unwrap(),
            QueueEvent::Completed {
                job_id: "j1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_fail_attempt_reschedules_with_backoff() {
        let queue = queue();
        let now = Utc::now();
        queue.add(job("j1"), now).unwrap();
        let _ = queue.claim_due(now);

        let outcome = queue.fail_attempt("j1", "boom".to_string(), now);
        assert_eq!(
            outcome,
            RetryOutcome::Retrying {
                attempt: 1,
                retry_in: Duration::from_secs(2)
            }
        );

        // not claimable until the backoff elapses
        assert!(queue.claim_due(now).is_empty());
        let later = now + chrono::Duration::seconds(3);
        assert_eq!(queue.claim_due(later).len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_budget_settles_failed() {
        let queue = queue();
        let mut events = queue.subscribe();
        let mut now = Utc::now();
        queue.add(job("j1"), now).unwrap();

        for expected_attempt in 1..=3u32 {
            let claimed = queue.claim_due(now);
            assert_eq!(claimed.len(), 1, "attempt {expected_attempt}");
            let outcome = queue.fail_attempt("j1", "boom".to_string(), now);
            if expected_attempt < 3 {
                assert!(matches!(outcome, RetryOutcome::Retrying { .. }));
                now += chrono::Duration::seconds(10);
            } else {
                assert_eq!(outcome, RetryOutcome::Exhausted { attempts: 3 });
            }
        }

        // terminal: record retained, no further claims, one Failed event
        let snapshot = queue.get("j1", now).unwrap();
        assert_eq!(snapshot.state, "failed");
        assert_eq!(snapshot.attempts, 3);
        assert!(queue.claim_due(now + chrono::Duration::days(1)).is_empty());
        assert_eq!(
            events.try_recv().unwrap(),
            QueueEvent::Failed {
                job_id: "j1".to_string(),
                reason: "boom".to_string()
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_snapshot_reports_waiting_when_due() {
        let queue = queue();
        let now = Utc::now();
        queue.add(job("j1"), now + chrono::Duration::seconds(60)).unwrap();

        assert_eq!(queue.get("j1", now).unwrap().state, "delayed");
        let later = now + chrono::Duration::seconds(120);
        assert_eq!(queue.get("j1", later).unwrap().state, "waiting");
    }

    #[tokio::test]
    async fn test_time_until_next() {
        let queue = queue();
        let now = Utc::now();
        assert!(queue.time_until_next(now).is_none());

        queue.add(job("j1"), now + chrono::Duration::seconds(30)).unwrap();
        let wait = queue.time_until_next(now).unwrap();
        assert!(wait <= Duration::from_secs(30));
        assert!(wait > Duration::from_secs(28));
    }
}
