//! Per-user request throttle
//!
//! A fixed-window counter in Redis bounds how many scheduling requests a
//! user may issue per window. The first request of a window starts the
//! window's expiry (`INCR` then `EXPIRE`); every request increments
//! atomically.
//!
//! When the counter store cannot be reached the behavior is configurable:
//! fail-open (the original deployment's choice — requests are allowed
//! with `remaining = 0`, which permits unlimited requests for the length
//! of the outage) or fail-closed (the request is rejected with a server
//! error). Fail-open is the default and is deliberately availability-
//! over-strictness; see [`crate::config::RateLimitFailureMode`].

use deadpool_redis::Pool as RedisPool;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{RateLimitFailureMode, RateLimitSettings};

/// Outcome of one throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
    /// Milliseconds until the window resets
    pub reset_ms: u64,
}

/// Throttle errors. Only surfaced to callers in fail-closed mode.
#[derive(Debug, Error)]
pub enum ThrottleError {
    /// Could not obtain a connection from the pool
    #[error("failed to get Redis connection: {0}")]
    Pool(String),

    /// A Redis command failed
    #[error("Redis command failed: {0}")]
    Store(String),
}

/// Fixed-window per-user scheduling throttle.
#[derive(Clone)]
pub struct ScheduleThrottle {
    pool: RedisPool,
    settings: RateLimitSettings,
}

impl ScheduleThrottle {
    /// Create a throttle over a Redis pool.
    #[must_use]
    pub fn new(pool: RedisPool, settings: RateLimitSettings) -> Self {
        Self { pool, settings }
    }

    /// Check (and count) one scheduling request for a user.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError`] only in fail-closed mode when the
    /// counter store is unreachable; in fail-open mode store failures
    /// yield an allowed decision with `remaining = 0`.
    pub async fn check(&self, user_id: Uuid) -> Result<RateLimitDecision, ThrottleError> {
        match self.check_store(user_id).await {
            Ok(decision) => Ok(decision),
            Err(err) => match self.settings.failure_mode {
                RateLimitFailureMode::Open => {
                    warn!(
                        user_id = %user_id,
                        error = %err,
                        "rate limit check failed, failing open"
                    );
                    Ok(RateLimitDecision {
                        allowed: true,
                        remaining: 0,
                        reset_ms: 0,
                    })
                }
                RateLimitFailureMode::Closed => Err(err),
            },
        }
    }

    async fn check_store(&self, user_id: Uuid) -> Result<RateLimitDecision, ThrottleError> {
        let key = format!("rate-limit:{user_id}");
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ThrottleError::Pool(e.to_string()))?;

        let count: u64 = redis::cmd("INCR")
            .arg(&key)
            .query_async(&mut *conn)
            .await
            .map_err(|e| ThrottleError::Store(e.to_string()))?;

        // First request of the window starts its expiry.
        if count == 1 {
            let window = i64::try_from(self.settings.window_secs).unwrap_or(i64::MAX);
            let _: () = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(window)
                .query_async(&mut *conn)
                .await
                .map_err(|e| ThrottleError::Store(e.to_string()))?;
        }

        let ttl_ms: i64 = redis::cmd("PTTL")
            .arg(&key)
            .query_async(&mut *conn)
            .await
            .map_err(|e| ThrottleError::Store(e.to_string()))?;
        let reset_ms = if ttl_ms < 0 {
            self.settings.window_secs * 1000
        } else {
            ttl_ms as u64
        };

        let decision = decide(count, self.settings.max_requests, reset_ms);

        if decision.allowed {
            debug!(user_id = %user_id, count, "rate limit check passed");
        } else {
            warn!(
                user_id = %user_id,
                count,
                max_requests = self.settings.max_requests,
                "rate limit exceeded"
            );
        }

        Ok(decision)
    }
}

/// Map a window count to a decision. Split out of the Redis path so the
/// arithmetic is testable without a store.
fn decide(count: u64, max_requests: u32, reset_ms: u64) -> RateLimitDecision {
    let allowed = count <= u64::from(max_requests);
    let remaining = u64::from(max_requests)
        .saturating_sub(count)
        .try_into()
        .unwrap_or(u32::MAX);
    RateLimitDecision {
        allowed,
        remaining,
        reset_ms,
    }
}
