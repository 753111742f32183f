//! Dashboard analytics endpoints.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::models;
use crate::state::AppState;

/// `GET /analytics/daily` — per-day status counts over the last week.
pub async fn daily(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Value>, AppError> {
    let stats = models::email::daily_stats(state.db(), current.id, 7).await?;
    Ok(Json(json!(stats)))
}
