//! Reusable email templates (naive placeholder storage, no rendering).

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// One template row.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// Template id
    pub id: Uuid,
    /// Owning user
    pub user_id: Uuid,
    /// Display name
    pub name: String,
    /// Subject line
    pub subject: String,
    /// Plain body
    pub body: String,
    /// Optional HTML body
    pub html: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Create a template.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn create(
    pool: &PgPool,
    user_id: Uuid,
    name: &str,
    subject: &str,
    body: &str,
    html: Option<&str>,
) -> Result<Template, sqlx::Error> {
    sqlx::query_as::<_, Template>(
        "INSERT INTO templates (id, user_id, name, subject, body, html) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(name)
    .bind(subject)
    .bind(body)
    .bind(html)
    .fetch_one(pool)
    .await
}

/// List a user's templates, newest first.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Template>, sqlx::Error> {
    sqlx::query_as::<_, Template>(
        "SELECT * FROM templates WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Update a template, owner-scoped; absent fields are left unchanged.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn update(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
    name: Option<&str>,
    subject: Option<&str>,
    body: Option<&str>,
    html: Option<&str>,
) -> Result<Option<Template>, sqlx::Error> {
    sqlx::query_as::<_, Template>(
        "UPDATE templates SET \
           name = COALESCE($3, name), \
           subject = COALESCE($4, subject), \
           body = COALESCE($5, body), \
           html = COALESCE($6, html) \
         WHERE id = $1 AND user_id = $2 RETURNING *",
    )
    .bind(id)
    .bind(user_id)
    .bind(name)
    .bind(subject)
    .bind(body)
    .bind(html)
    .fetch_optional(pool)
    .await
}

/// Delete a template, owner-scoped. Returns whether a row was removed.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn delete(pool: &PgPool, id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM templates WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
