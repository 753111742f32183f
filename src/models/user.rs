//! User accounts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// One user row. The password hash is never serialized.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User id
    pub id: Uuid,
    /// Unique email
    pub email: String,
    /// Argon2id hash; `None` for OAuth-only accounts
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    /// Display name
    pub name: Option<String>,
    /// Avatar URL
    pub avatar: Option<String>,
    /// Google subject id, when linked
    pub google_id: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Find a user by email.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
}

/// Find a user by id.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Create a user. The id is generated here so callers get it back even
/// on conflict errors.
///
/// # Errors
///
/// Returns the underlying database error (unique violation on a
/// duplicate email).
pub async fn create(
    pool: &PgPool,
    email: &str,
    password_hash: Option<&str>,
    name: Option<&str>,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "INSERT INTO users (id, email, password_hash, name) \
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .bind(name)
    .fetch_one(pool)
    .await
}

/// Update the fields a user may edit; absent fields are left unchanged.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn update_profile(
    pool: &PgPool,
    id: Uuid,
    name: Option<&str>,
    avatar: Option<&str>,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "UPDATE users SET name = COALESCE($2, name), avatar = COALESCE($3, avatar) \
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(name)
    .bind(avatar)
    .fetch_optional(pool)
    .await
}

/// Create a user from a Google profile, or link the Google subject id to
/// an existing account with the same email.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn upsert_google(
    pool: &PgPool,
    email: &str,
    google_id: &str,
    name: Option<&str>,
    avatar: Option<&str>,
) -> Result<User, sqlx::Error> {
    if let Some(user) = find_by_email(pool, email).await? {
        if user.google_id.is_some() {
            return Ok(user);
        }
        return sqlx::query_as::<_, User>(
            "UPDATE users SET google_id = $2, avatar = COALESCE($3, avatar) \
             WHERE id = $1 RETURNING *",
        )
        .bind(user.id)
        .bind(google_id)
        .bind(avatar)
        .fetch_one(pool)
        .await;
    }

    sqlx::query_as::<_, User>(
        "INSERT INTO users (id, email, google_id, name, avatar) \
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(google_id)
    .bind(name)
    .bind(avatar)
    .fetch_one(pool)
    .await
}
