//! Account endpoints: register, login, profile and Google delegation.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Redirect,
    Json,
};
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::auth::{hash_password, jwt, verify_password};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::models::{self, User};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Account email
    #[validate(email)]
    pub email: String,
    /// Plain password
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    /// Optional display name
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackParams {
    pub code: String,
}

fn token_for(user: &User, config: &AppConfig) -> Result<String, AppError> {
    jwt::issue_token(
        user.id,
        &user.email,
        &config.jwt.secret,
        config.jwt.expiry_hours,
    )
}

/// `POST /auth/register`
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    if models::user::find_by_email(state.db(), &request.email)
        .await?
        .is_some()
    {
        return Err(AppError::Validation("User already exists".to_string()));
    }

    let password_hash =
        hash_password(&request.password).map_err(|e| AppError::Internal(e.to_string()))?;
    let user = models::user::create(
        state.db(),
        &request.email,
        Some(&password_hash),
        request.name.as_deref(),
    )
    .await?;

    let token = token_for(&user, state.config())?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User registered successfully",
            "token": token,
            "user": user,
        })),
    ))
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Value>, AppError> {
    if request.email.is_empty() || request.password.is_empty() {
        return Err(AppError::Validation(
            "Email and password are required".to_string(),
        ));
    }

    let user = models::user::find_by_email(state.db(), &request.email)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;

    let hash = user
        .password_hash
        .as_deref()
        .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;
    let valid =
        verify_password(&request.password, hash).map_err(|e| AppError::Internal(e.to_string()))?;
    if !valid {
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }

    let token = token_for(&user, state.config())?;
    Ok(Json(json!({
        "message": "Login successful",
        "token": token,
        "user": user,
    })))
}

/// `GET /auth/me`
pub async fn me(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Value>, AppError> {
    let user = models::user::find_by_id(state.db(), current.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;
    Ok(Json(json!({ "user": user })))
}

/// `PUT /auth/profile`
pub async fn update_profile(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<Value>, AppError> {
    let user = models::user::update_profile(
        state.db(),
        current.id,
        request.name.as_deref(),
        request.avatar.as_deref(),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("User".to_string()))?;
    Ok(Json(json!({ "user": user })))
}

type GoogleClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

fn google_client(config: &AppConfig) -> Result<GoogleClient, AppError> {
    if !config.oauth.is_configured() {
        return Err(AppError::NotFound("Google sign-in".to_string()));
    }
    let bad_url = |e: oauth2::url::ParseError| AppError::Config(format!("OAuth URL: {e}"));

    Ok(
        BasicClient::new(ClientId::new(config.oauth.google_client_id.clone()))
            .set_client_secret(ClientSecret::new(config.oauth.google_client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new("https://accounts.google.com/o/oauth2/v2/auth".to_string())
                    .map_err(bad_url)?,
            )
            .set_token_uri(
                TokenUrl::new("https://oauth2.googleapis.com/token".to_string())
                    .map_err(bad_url)?,
            )
            .set_redirect_uri(
                RedirectUrl::new(config.oauth.google_redirect_url.clone()).map_err(bad_url)?,
            ),
    )
}

/// `GET /auth/google` — send the browser to Google's consent screen.
pub async fn google_redirect(State(state): State<AppState>) -> Result<Redirect, AppError> {
    let client = google_client(state.config())?;
    let (auth_url, _csrf_state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new("openid".to_string()))
        .add_scope(Scope::new("email".to_string()))
        .add_scope(Scope::new("profile".to_string()))
        .url();
    Ok(Redirect::temporary(auth_url.as_str()))
}

/// Google user info response
#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
    email: String,
    name: Option<String>,
    picture: Option<String>,
}

/// `GET /auth/google/callback` — exchange the code, upsert the account
/// and hand the token off to the dashboard.
pub async fn google_callback(
    State(state): State<AppState>,
    Query(params): Query<OAuthCallbackParams>,
) -> Result<Redirect, AppError> {
    let client = google_client(state.config())?;

    // Redirects must stay disabled during the token exchange.
    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| AppError::Internal(format!("HTTP client: {e}")))?;

    let token = client
        .exchange_code(AuthorizationCode::new(params.code))
        .request_async(&http_client)
        .await
        .map_err(|e| AppError::Unauthorized(format!("token exchange failed: {e}")))?;

    let profile: GoogleUserInfo = http_client
        .get("https://www.googleapis.com/oauth2/v2/userinfo")
        .bearer_auth(token.access_token().secret())
        .send()
        .await
        .map_err(|e| AppError::Internal(format!("userinfo request failed: {e}")))?
        .json()
        .await
        .map_err(|e| AppError::Internal(format!("userinfo parse failed: {e}")))?;

    let user = models::user::upsert_google(
        state.db(),
        &profile.email,
        &profile.id,
        profile.name.as_deref(),
        profile.picture.as_deref(),
    )
    .await?;

    let token = token_for(&user, state.config())?;
    let target = format!("{}/auth/callback?token={token}", state.config().client.url);
    Ok(Redirect::temporary(&target))
}
