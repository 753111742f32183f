//! Application state
//!
//! One explicitly constructed value holding every shared service, cloned
//! cheaply into handlers via `Arc`. Construction happens in `main`; no
//! component reaches for a global.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::jobs::DelayedQueue;
use crate::notify::StatusNotifier;
use crate::scheduling::{ScheduleThrottle, SubmissionGateway};

struct Inner {
    config: AppConfig,
    db: PgPool,
    queue: Arc<DelayedQueue>,
    throttle: ScheduleThrottle,
    gateway: SubmissionGateway,
    notifier: Arc<StatusNotifier>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

impl AppState {
    /// Assemble the state from its already-constructed services.
    #[must_use]
    pub fn new(
        config: AppConfig,
        db: PgPool,
        queue: Arc<DelayedQueue>,
        throttle: ScheduleThrottle,
        notifier: Arc<StatusNotifier>,
    ) -> Self {
        let gateway = SubmissionGateway::new(db.clone(), queue.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                db,
                queue,
                throttle,
                gateway,
                notifier,
            }),
        }
    }

    /// Application configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Database pool.
    #[must_use]
    pub fn db(&self) -> &PgPool {
        &self.inner.db
    }

    /// The delayed job queue.
    #[must_use]
    pub fn queue(&self) -> &DelayedQueue {
        &self.inner.queue
    }

    /// The per-user scheduling throttle.
    #[must_use]
    pub fn throttle(&self) -> &ScheduleThrottle {
        &self.inner.throttle
    }

    /// The job submission gateway.
    #[must_use]
    pub fn gateway(&self) -> &SubmissionGateway {
        &self.inner.gateway
    }

    /// The status notifier registry.
    #[must_use]
    pub fn notifier(&self) -> &Arc<StatusNotifier> {
        &self.inner.notifier
    }
}
