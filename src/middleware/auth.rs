//! Authentication middleware for protecting routes
//!
//! Verifies the bearer token, confirms the user still exists and inserts
//! a [`CurrentUser`] into the request extensions. Handlers take
//! `CurrentUser` as an extractor.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::jwt;
use crate::error::AppError;
use crate::models;
use crate::state::AppState;

/// The authenticated caller, resolved from the bearer token.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// User id
    pub id: Uuid,
    /// User email
    pub email: String,
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Missing token".to_string()))
    }
}

/// Middleware that requires a valid bearer token.
///
/// # Errors
///
/// Returns [`AppError::Unauthorized`] when the Authorization header is
/// missing or malformed, the token does not verify, or the user no
/// longer exists.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Missing token".to_string()))?;

    let claims = jwt::verify_token(token, &state.config().jwt.secret)?;

    // The token may outlive the account; confirm the user still exists.
    let user = models::user::find_by_id(state.db(), claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found".to_string()))?;

    request.extensions_mut().insert(CurrentUser {
        id: user.id,
        email: user.email,
    });
    Ok(next.run(request).await)
}
