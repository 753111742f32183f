//! Status notifier
//!
//! Pushes job outcomes to the owning user's live connections. The
//! notifier consumes the queue's event stream — not the worker directly —
//! so multiple worker processes could share one notifier.
//!
//! The registry maps a user id to its active connections; the notifier
//! only looks connections up, it never owns their lifecycle (the
//! WebSocket handler registers on connect and unregisters on close).
//! Delivery is best-effort: with no active connection the event is
//! dropped and the dashboard's periodic poll catches the state up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::jobs::{owner_of, QueueEvent};

type ConnectionMap = HashMap<Uuid, HashMap<u64, mpsc::UnboundedSender<String>>>;

/// Per-user connection registry and event fan-out.
#[derive(Default)]
pub struct StatusNotifier {
    connections: RwLock<ConnectionMap>,
    next_connection: AtomicU64,
}

/// Handle to the spawned queue-event listener.
pub struct ListenerHandle {
    task: tokio::task::JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop listening. Registered connections are unaffected.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl StatusNotifier {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user. Returns the connection id (for
    /// [`Self::unsubscribe`]) and the event receiver to forward from.
    pub async fn subscribe(&self, user_id: Uuid) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.connections
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(connection_id, tx);
        debug!(user_id = %user_id, connection_id, "connection registered");
        (connection_id, rx)
    }

    /// Remove a connection from the registry.
    pub async fn unsubscribe(&self, user_id: Uuid, connection_id: u64) {
        let mut connections = self.connections.write().await;
        if let Some(user_connections) = connections.get_mut(&user_id) {
            user_connections.remove(&connection_id);
            if user_connections.is_empty() {
                connections.remove(&user_id);
            }
        }
        debug!(user_id = %user_id, connection_id, "connection removed");
    }

    /// Active connections for a user.
    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.connections
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashMap::len)
    }

    /// Push a payload to every active connection of one user only.
    pub async fn emit_to_user(&self, user_id: Uuid, payload: &str) {
        let mut connections = self.connections.write().await;
        let Some(user_connections) = connections.get_mut(&user_id) else {
            debug!(user_id = %user_id, "no live connection, event dropped");
            return;
        };
        // A send only fails when the receiving connection task is gone;
        // prune those entries while delivering.
        user_connections.retain(|_, tx| tx.send(payload.to_string()).is_ok());
        if user_connections.is_empty() {
            connections.remove(&user_id);
        }
    }

    /// Spawn the queue-event listener. It runs until the queue is dropped
    /// or [`ListenerHandle::shutdown`] is called.
    #[must_use]
    pub fn spawn_listener(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<QueueEvent>,
    ) -> ListenerHandle {
        let notifier = Arc::clone(self);
        let task = tokio::spawn(async move {
            info!("queue event listener started");
            loop {
                match events.recv().await {
                    Ok(event) => notifier.dispatch(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "queue event listener lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!("queue event listener stopped");
        });
        ListenerHandle { task }
    }

    async fn dispatch(&self, event: QueueEvent) {
        let (job_id, payload) = match event {
            QueueEvent::Completed { job_id } => {
                let payload = json!({
                    "event": "job-completed",
                    "data": { "jobId": job_id, "status": "completed" },
                });
                (job_id, payload)
            }
            QueueEvent::Failed { job_id, reason } => {
                let payload = json!({
                    "event": "job-failed",
                    "data": { "jobId": job_id, "status": "failed", "reason": reason },
                });
                (job_id, payload)
            }
        };

        let Some(user_id) = owner_of(&job_id) else {
            warn!(job_id = %job_id, "job id does not encode an owner, event dropped");
            return;
        };
        self.emit_to_user(user_id, &payload.to_string()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{new_job_id, DelayedQueue, EmailJob, RetryPolicy};
    use chrono::Utc;
    use std::time::Duration;

    fn job_for(user_id: Uuid) -> EmailJob {
        EmailJob {
            id: new_job_id(user_id, Utc::now()),
            user_id,
            to: "user@example.com".to_string(),
            subject: "Subject".to_string(),
            body: "Body".to_string(),
            html: None,
            scheduled_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_reaches_only_the_owner() {
        let queue = DelayedQueue::new("test_jobs", RetryPolicy::default(), None);
        let notifier = Arc::new(StatusNotifier::new());
        let listener = notifier.spawn_listener(queue.subscribe());

        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (_, mut owner_rx) = notifier.subscribe(owner).await;
        let (_, mut other_rx) = notifier.subscribe(other).await;

        let job = job_for(owner);
        let job_id = job.id.clone();
        queue.add(job, Utc::now()).unwrap();
        let _ = queue.claim_due(Utc::now());
        queue.complete(&job_id);

        let payload = tokio::time::timeout(Duration::from_secs(1), owner_rx.recv())
            .await
            .expect("owner should be notified")
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["event"], "job-completed");
        assert_eq!(value["data"]["jobId"], job_id);
        assert_eq!(value["data"]["status"], "completed");

        // the other user's connection must stay silent
        assert!(
            tokio::time::timeout(Duration::from_millis(100), other_rx.recv())
                .await
                .is_err()
        );
        listener.shutdown();
    }

    #[tokio::test]
    async fn test_failed_event_carries_reason() {
        let queue = DelayedQueue::new(
            "test_jobs",
            RetryPolicy::new(1, Duration::from_millis(1)),
            None,
        );
        let notifier = Arc::new(StatusNotifier::new());
        let listener = notifier.spawn_listener(queue.subscribe());

        let owner = Uuid::new_v4();
        let (_, mut rx) = notifier.subscribe(owner).await;

        let job = job_for(owner);
        let job_id = job.id.clone();
        queue.add(job, Utc::now()).unwrap();
        let _ = queue.claim_due(Utc::now());
        let _ = queue.fail_attempt(&job_id, "relay refused".to_string(), Utc::now());

        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("owner should be notified")
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["event"], "job-failed");
        assert_eq!(value["data"]["reason"], "relay refused");
        listener.shutdown();
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_connection() {
        let notifier = StatusNotifier::new();
        let user = Uuid::new_v4();
        let (conn_a, _rx_a) = notifier.subscribe(user).await;
        let (_conn_b, _rx_b) = notifier.subscribe(user).await;
        assert_eq!(notifier.connection_count(user).await, 2);

        notifier.unsubscribe(user, conn_a).await;
        assert_eq!(notifier.connection_count(user).await, 1);
    }

    #[tokio::test]
    async fn test_emit_without_connection_is_dropped() {
        let notifier = StatusNotifier::new();
        // no panic, nothing to assert — delivery is best-effort
        notifier.emit_to_user(Uuid::new_v4(), "{}").await;
    }
}
