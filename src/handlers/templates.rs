//! Template CRUD endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::models;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTemplateRequest {
    #[validate(length(min = 1, message = "name must not be empty"))]
    pub name: String,
    #[validate(length(min = 1, message = "subject must not be empty"))]
    pub subject: String,
    #[validate(length(min = 1, message = "body must not be empty"))]
    pub body: String,
    pub html: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateRequest {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub html: Option<String>,
}

/// `POST /templates`
pub async fn create(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(request): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let template = models::template::create(
        state.db(),
        current.id,
        &request.name,
        &request.subject,
        &request.body,
        request.html.as_deref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(json!(template))))
}

/// `GET /templates`
pub async fn list(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Value>, AppError> {
    let templates = models::template::list_for_user(state.db(), current.id).await?;
    Ok(Json(json!(templates)))
}

/// `PUT /templates/{id}`
pub async fn update(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateTemplateRequest>,
) -> Result<Json<Value>, AppError> {
    let template = models::template::update(
        state.db(),
        id,
        current.id,
        request.name.as_deref(),
        request.subject.as_deref(),
        request.body.as_deref(),
        request.html.as_deref(),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("Template".to_string()))?;
    Ok(Json(json!(template)))
}

/// `DELETE /templates/{id}`
pub async fn remove(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let deleted = models::template::delete(state.db(), id, current.id).await?;
    if !deleted {
        return Err(AppError::NotFound("Template".to_string()));
    }
    Ok(Json(json!({ "message": "Template deleted" })))
}
