//! Scheduled email records.
//!
//! One row per scheduled message, owned exclusively by its user. Rows are
//! created by the submission gateway with status `pending` and mutated
//! only by the dispatch worker (status / sent time) or by the owner's
//! star toggle. The core never deletes them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool, QueryBuilder};
use uuid::Uuid;

/// Lifecycle status of a scheduled email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailStatus {
    /// Queued, not yet dispatched
    Pending,
    /// Delivered
    Sent,
    /// Last attempt failed
    Failed,
}

impl EmailStatus {
    /// Lowercase name, as stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown email status: {other}")),
        }
    }
}

/// One scheduled email row.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledEmail {
    /// Record id; doubles as the queue job id
    pub id: String,
    /// Owning user
    pub user_id: Uuid,
    /// Recipient address
    #[serde(rename = "to")]
    pub recipient: String,
    /// Subject line
    pub subject: String,
    /// Plain body
    pub body: String,
    /// Optional HTML body
    pub html: Option<String>,
    /// Target send time
    pub scheduled_at: DateTime<Utc>,
    /// Lifecycle status: pending, sent or failed
    pub status: String,
    /// Starred flag, toggled by the owner
    pub starred: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Delivery time, once sent
    pub sent_at: Option<DateTime<Utc>>,
}

/// Fields for a new pending record.
#[derive(Debug, Clone)]
pub struct NewEmail<'a> {
    /// Record/job id
    pub id: &'a str,
    /// Owning user
    pub user_id: Uuid,
    /// Recipient address
    pub recipient: &'a str,
    /// Subject line
    pub subject: &'a str,
    /// Plain body
    pub body: &'a str,
    /// Optional HTML body
    pub html: Option<&'a str>,
    /// Target send time
    pub scheduled_at: DateTime<Utc>,
}

/// Listing filters for the paginated index.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// 1-based page
    pub page: i64,
    /// Page size
    pub limit: i64,
    /// Exact status filter
    pub status: Option<EmailStatus>,
    /// Case-insensitive substring match on recipient or subject
    pub search: Option<String>,
}

/// Per-day send counts for the dashboard chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyStat {
    /// Day, `YYYY-MM-DD`
    pub date: String,
    /// Emails sent that day
    pub sent: i64,
    /// Emails failed that day
    pub failed: i64,
    /// Emails still pending from that day
    pub pending: i64,
}

/// Insert a new record with status `pending`.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn insert_pending(
    pool: &PgPool,
    new: &NewEmail<'_>,
) -> Result<ScheduledEmail, sqlx::Error> {
    sqlx::query_as::<_, ScheduledEmail>(
        "INSERT INTO emails (id, user_id, recipient, subject, body, html, scheduled_at, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending') RETURNING *",
    )
    .bind(new.id)
    .bind(new.user_id)
    .bind(new.recipient)
    .bind(new.subject)
    .bind(new.body)
    .bind(new.html)
    .bind(new.scheduled_at)
    .fetch_one(pool)
    .await
}

/// Overwrite the status with `sent` and stamp the send time.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn mark_sent(
    pool: &PgPool,
    id: &str,
    sent_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE emails SET status = 'sent', sent_at = $2 WHERE id = $1")
        .bind(id)
        .bind(sent_at)
        .execute(pool)
        .await?;
    Ok(())
}

/// Overwrite the status with `failed`.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn mark_failed(pool: &PgPool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE emails SET status = 'failed' WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Fetch one record, owner-scoped.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn find_for_user(
    pool: &PgPool,
    id: &str,
    user_id: Uuid,
) -> Result<Option<ScheduledEmail>, sqlx::Error> {
    sqlx::query_as::<_, ScheduledEmail>("SELECT * FROM emails WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Toggle the starred flag, owner-scoped.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn toggle_star(
    pool: &PgPool,
    id: &str,
    user_id: Uuid,
) -> Result<Option<ScheduledEmail>, sqlx::Error> {
    sqlx::query_as::<_, ScheduledEmail>(
        "UPDATE emails SET starred = NOT starred WHERE id = $1 AND user_id = $2 RETURNING *",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Paginated listing with optional status and search filters, newest
/// first. Returns the page and the total row count for the filter.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn list_for_user(
    pool: &PgPool,
    user_id: Uuid,
    filter: &ListFilter,
) -> Result<(Vec<ScheduledEmail>, i64), sqlx::Error> {
    let mut query = QueryBuilder::new("SELECT * FROM emails WHERE user_id = ");
    push_filters(&mut query, user_id, filter);
    query
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(filter.limit)
        .push(" OFFSET ")
        .push_bind((filter.page - 1) * filter.limit);
    let emails = query
        .build_query_as::<ScheduledEmail>()
        .fetch_all(pool)
        .await?;

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM emails WHERE user_id = ");
    push_filters(&mut count, user_id, filter);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    Ok((emails, total))
}

fn push_filters(
    query: &mut QueryBuilder<'_, sqlx::Postgres>,
    user_id: Uuid,
    filter: &ListFilter,
) {
    query.push_bind(user_id);
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{search}%");
        query
            .push(" AND (recipient ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR subject ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// Per-day status counts over the trailing `days` days, oldest first.
/// Days with no activity are present with zero counts.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn daily_stats(
    pool: &PgPool,
    user_id: Uuid,
    days: i64,
) -> Result<Vec<DailyStat>, sqlx::Error> {
    let since = Utc::now() - Duration::days(days);
    let rows: Vec<(String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT status, created_at FROM emails WHERE user_id = $1 AND created_at >= $2",
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(pool)
    .await?;

    let mut by_day: BTreeMap<String, (i64, i64, i64)> = BTreeMap::new();
    for offset in 0..days {
        let day = (Utc::now() - Duration::days(offset)).format("%Y-%m-%d");
        by_day.insert(day.to_string(), (0, 0, 0));
    }

    for (status, created_at) in rows {
        let day = created_at.format("%Y-%m-%d").to_string();
        if let Some(counts) = by_day.get_mut(&day) {
            match status.parse::<EmailStatus>() {
                Ok(EmailStatus::Sent) => counts.0 += 1,
                Ok(EmailStatus::Failed) => counts.1 += 1,
                _ => counts.2 += 1,
            }
        }
    }

    Ok(by_day
        .into_iter()
        .map(|(date, (sent, failed, pending))| DailyStat {
            date,
            sent,
            failed,
            pending,
        })
        .collect())
}
