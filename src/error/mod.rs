//! Error types and error handling
//!
//! Request-time failures are caught at the handler boundary and turned into
//! structured JSON responses; nothing is allowed to crash the process.
//! Job-level delivery errors never reach this type — they stay inside the
//! queue's retry policy.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::jobs::JobError;
use crate::scheduling::planner::InvalidBatch;
use crate::scheduling::throttle::ThrottleError;

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed request fields (400)
    #[error("{0}")]
    Validation(String),

    /// Missing, invalid or expired credentials (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource does not exist or belongs to another user (404)
    #[error("{0} not found")]
    NotFound(String),

    /// The scheduling throttle denied the request (429)
    #[error("Rate limit exceeded")]
    RateLimited {
        /// Requests left in the current window
        remaining: u32,
        /// Milliseconds until the window resets
        reset_ms: u64,
    },

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Queue error (500)
    #[error("Queue error: {0}")]
    Queue(#[from] JobError),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other transient infrastructure error (500)
    #[error("{0}")]
    Internal(String),
}

impl From<InvalidBatch> for AppError {
    fn from(err: InvalidBatch) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<ThrottleError> for AppError {
    fn from(err: ThrottleError) -> Self {
        Self::Internal(format!("rate limiter unavailable: {err}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            Self::Unauthorized(reason) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": format!("Unauthorized: {reason}") })),
            )
                .into_response(),
            Self::NotFound(what) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("{what} not found") })),
            )
                .into_response(),
            Self::RateLimited { remaining, reset_ms } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "Rate limit exceeded",
                    "remaining": remaining,
                    "resetTime": reset_ms,
                })),
            )
                .into_response(),
            Self::Database(_) | Self::Queue(_) | Self::Config(_) | Self::Internal(_) => {
                error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}
