//! Email scheduling endpoints.
//!
//! Every scheduling request — single or batch — passes the per-user
//! throttle before any record or job is created.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::models::{self, EmailStatus, ListFilter};
use crate::scheduling::planner::{parse_start_time, BatchRequest};
use crate::scheduling::NewMessage;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    /// Recipient address
    #[validate(email)]
    pub to: String,
    /// Subject line
    #[validate(length(min = 1, message = "subject must not be empty"))]
    pub subject: String,
    /// Plain body
    #[validate(length(min = 1, message = "body must not be empty"))]
    pub body: String,
    /// Optional HTML body
    pub html: Option<String>,
    /// Target send time, RFC 3339
    pub scheduled_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchScheduleRequest {
    /// Ordered recipient list
    pub recipients: Vec<String>,
    /// Shared subject
    pub subject: String,
    /// Shared plain body
    pub body: String,
    /// Shared HTML body
    pub html: Option<String>,
    /// Base send time, RFC 3339
    pub scheduled_at: String,
    /// Per-message delay in seconds
    pub delay_seconds: Option<u64>,
    /// Hourly cap; 0 or absent means unlimited
    pub hourly_limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub search: Option<String>,
}

async fn check_throttle(state: &AppState, user_id: Uuid) -> Result<(), AppError> {
    let decision = state.throttle().check(user_id).await?;
    if !decision.allowed {
        return Err(AppError::RateLimited {
            remaining: decision.remaining,
            reset_ms: decision.reset_ms,
        });
    }
    Ok(())
}

/// `POST /email/schedule`
pub async fn schedule(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(request): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    check_throttle(&state, current.id).await?;

    let send_at = parse_start_time(&request.scheduled_at)?;
    let submission = state
        .gateway()
        .submit_single(
            current.id,
            &NewMessage {
                to: request.to,
                subject: request.subject,
                body: request.body,
                html: request.html,
                send_at,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "jobId": submission.job_id,
            "emailId": submission.email_id,
            "message": "Email scheduled successfully",
        })),
    ))
}

/// `POST /email/batch-schedule`
pub async fn batch_schedule(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(request): Json<BatchScheduleRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    check_throttle(&state, current.id).await?;

    let start_at = parse_start_time(&request.scheduled_at)?;
    let batch = BatchRequest {
        recipients: request.recipients,
        subject: request.subject,
        body: request.body,
        html: request.html,
        start_at,
        delay_seconds: request.delay_seconds.unwrap_or(0),
        hourly_limit: request.hourly_limit.unwrap_or(0),
    };
    let submission = state.gateway().submit_batch(current.id, &batch).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "count": submission.queued,
        })),
    ))
}

/// `GET /email?page&limit&status&search`
pub async fn list(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<EmailStatus>)
        .transpose()
        .map_err(AppError::Validation)?;
    let filter = ListFilter {
        page: query.page.unwrap_or(1).max(1),
        limit: query.limit.unwrap_or(10).clamp(1, 100),
        status,
        search: query.search,
    };

    let (emails, total) = models::email::list_for_user(state.db(), current.id, &filter).await?;
    Ok(Json(json!({
        "emails": emails,
        "pagination": {
            "total": total,
            "page": filter.page,
            "limit": filter.limit,
            "pages": (total as u64).div_ceil(filter.limit as u64),
        },
    })))
}

/// `GET /email/{id}`
pub async fn get_one(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let email = models::email::find_for_user(state.db(), &id, current.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Email".to_string()))?;
    Ok(Json(json!(email)))
}

/// `PUT /email/{id}/star`
pub async fn toggle_star(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let email = models::email::toggle_star(state.db(), &id, current.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Email".to_string()))?;
    Ok(Json(json!(email)))
}

/// `GET /email/stats`
pub async fn queue_stats(State(state): State<AppState>, _current: CurrentUser) -> Json<Value> {
    Json(json!(state.queue().stats(Utc::now())))
}

/// `GET /email/job/{job_id}`
pub async fn job_status(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let snapshot = state
        .queue()
        .get(&job_id, Utc::now())
        .filter(|snapshot| snapshot.data.user_id == current.id)
        .ok_or_else(|| AppError::NotFound("Job".to_string()))?;
    Ok(Json(json!(snapshot)))
}
