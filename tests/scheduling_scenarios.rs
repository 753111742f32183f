//! End-to-end scenarios for the scheduling core and the dispatch path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use mailflow::email::{Email, EmailError, EmailSender};
use mailflow::jobs::{
    new_job_id, DelayedQueue, DispatchWorker, EmailJob, QueueEvent, RetryPolicy, StatusStore,
};
use mailflow::scheduling::planner::{parse_start_time, plan, BatchRequest, InvalidBatch};
use mailflow::scheduling::policy::effective_spacing_ms;

fn batch(recipients: &[&str], delay_seconds: u64, hourly_limit: u64) -> BatchRequest {
    BatchRequest {
        recipients: recipients.iter().map(ToString::to_string).collect(),
        subject: "Launch".to_string(),
        body: "We are live".to_string(),
        html: None,
        start_at: parse_start_time("2026-08-07T12:00:00Z").unwrap(),
        delay_seconds,
        hourly_limit,
    }
}

fn at(base: DateTime<Utc>, offset_ms: i64) -> DateTime<Utc> {
    base + chrono::Duration::milliseconds(offset_ms)
}

#[test]
fn delay_only_batch_spaces_by_delay() {
    // delaySeconds=5, hourlyLimit=0, 3 recipients
    let request = batch(&["a@x.com", "b@x.com", "c@x.com"], 5, 0);
    let sends = plan(&request).unwrap();

    let expected: Vec<DateTime<Utc>> = (0..3).map(|i| at(request.start_at, i * 5000)).collect();
    let actual: Vec<DateTime<Utc>> = sends.iter().map(|s| s.send_at).collect();
    assert_eq!(actual, expected);
}

#[test]
fn hourly_cap_batch_spaces_by_cap() {
    // delaySeconds=0, hourlyLimit=100 -> spacing 36_000 ms
    assert_eq!(effective_spacing_ms(0, 100), 36_000);

    let request = batch(&["a@x.com", "b@x.com", "c@x.com"], 0, 100);
    let sends = plan(&request).unwrap();

    assert_eq!(sends[0].send_at, request.start_at);
    assert_eq!(sends[1].send_at, at(request.start_at, 36_000));
    assert_eq!(sends[2].send_at, at(request.start_at, 72_000));
}

#[test]
fn slots_follow_input_order_exactly() {
    let request = batch(&["c@x.com", "a@x.com", "c@x.com", "b@x.com"], 7, 50);
    let sends = plan(&request).unwrap();
    let spacing = effective_spacing_ms(7, 50) as i64;

    for (i, send) in sends.iter().enumerate() {
        assert_eq!(send.recipient, request.recipients[i]);
        assert_eq!(send.send_at, at(request.start_at, spacing * i as i64));
    }
}

#[test]
fn zero_hourly_limit_does_not_divide() {
    assert_eq!(effective_spacing_ms(0, 0), 0);
    let request = batch(&["a@x.com"], 0, 0);
    let sends = plan(&request).unwrap();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].send_at, request.start_at);
}

#[test]
fn unparseable_start_time_is_invalid() {
    assert!(matches!(
        parse_start_time("soon"),
        Err(InvalidBatch::InvalidStartTime(_))
    ));
}

// Minimal in-process doubles for the dispatch path.

#[derive(Clone, Default)]
struct RecordingSender {
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, email: Email) -> Result<(), EmailError> {
        self.sent.lock().unwrap().push(email.to);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingStore {
    statuses: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl StatusStore for RecordingStore {
    async fn mark_sent(&self, id: &str, _sent_at: DateTime<Utc>) -> Result<(), sqlx::Error> {
        self.statuses
            .lock()
            .unwrap()
            .push((id.to_string(), "sent".to_string()));
        Ok(())
    }

    async fn mark_failed(&self, id: &str) -> Result<(), sqlx::Error> {
        self.statuses
            .lock()
            .unwrap()
            .push((id.to_string(), "failed".to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn due_jobs_flow_through_worker_to_sent() {
    let queue = Arc::new(DelayedQueue::new(
        "it_jobs",
        RetryPolicy::new(3, Duration::from_millis(10)),
        None,
    ));
    let sender = RecordingSender::default();
    let store = RecordingStore::default();
    let mut events = queue.subscribe();

    let owner = Uuid::new_v4();
    let now = Utc::now();
    for recipient in ["a@x.com", "b@x.com", "c@x.com"] {
        let id = new_job_id(owner, now);
        queue
            .add(
                EmailJob {
                    id,
                    user_id: owner,
                    to: recipient.to_string(),
                    subject: "Launch".to_string(),
                    body: "We are live".to_string(),
                    html: None,
                    scheduled_at: now,
                },
                now,
            )
            .unwrap();
    }

    let worker = DispatchWorker::new(
        queue.clone(),
        Arc::new(sender.clone()),
        Arc::new(store.clone()),
        5,
        Duration::from_secs(1),
    );
    let handle = worker.spawn();

    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("jobs should settle")
            .unwrap();
        assert!(matches!(event, QueueEvent::Completed { .. }));
    }
    handle.shutdown().await;

    let sent = sender.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 3);
    let statuses = store.statuses.lock().unwrap().clone();
    assert!(statuses.iter().all(|(_, status)| status == "sent"));
}
