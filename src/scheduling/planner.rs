//! Batch schedule planner
//!
//! Assigns each recipient in a batch an absolute send timestamp:
//! recipient `i` is sent at `start_at + i * spacing`. Input order is
//! preserved and recipients are not deduplicated — duplicate addresses
//! receive distinct, spaced slots.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use super::policy::effective_spacing_ms;

/// One batch scheduling request. Transient — exists only for the duration
/// of one submission call.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Ordered recipient list (not deduplicated)
    pub recipients: Vec<String>,
    /// Shared subject
    pub subject: String,
    /// Shared plain body
    pub body: String,
    /// Shared HTML body
    pub html: Option<String>,
    /// Base send time for slot 0
    pub start_at: DateTime<Utc>,
    /// Explicit per-message delay in seconds
    pub delay_seconds: u64,
    /// Hourly cap; 0 means unlimited
    pub hourly_limit: u64,
}

/// One planned send: a recipient and its absolute slot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSend {
    /// Recipient address
    pub recipient: String,
    /// Absolute send time
    pub send_at: DateTime<Utc>,
}

/// Why a batch cannot be planned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidBatch {
    /// The recipient list is empty
    #[error("recipient list is empty")]
    NoRecipients,

    /// The subject is empty
    #[error("subject must not be empty")]
    MissingSubject,

    /// The body is empty
    #[error("body must not be empty")]
    MissingBody,

    /// The base send time is not a valid instant
    #[error("invalid scheduled time: {0}")]
    InvalidStartTime(String),
}

/// Parse an ISO-8601 / RFC-3339 timestamp into an instant.
///
/// # Errors
///
/// Returns [`InvalidBatch::InvalidStartTime`] when the string cannot be
/// parsed.
pub fn parse_start_time(raw: &str) -> Result<DateTime<Utc>, InvalidBatch> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| InvalidBatch::InvalidStartTime(raw.to_string()))
}

/// Plan a batch: one [`PlannedSend`] per recipient, in input order, with
/// slot `i` at `start_at + i * spacing`.
///
/// # Errors
///
/// Returns [`InvalidBatch`] when the recipient list is empty or the
/// subject/body is empty.
pub fn plan(request: &BatchRequest) -> Result<Vec<PlannedSend>, InvalidBatch> {
    if request.recipients.is_empty() {
        return Err(InvalidBatch::NoRecipients);
    }
    if request.subject.trim().is_empty() {
        return Err(InvalidBatch::MissingSubject);
    }
    if request.body.trim().is_empty() {
        return Err(InvalidBatch::MissingBody);
    }

    let spacing_ms = effective_spacing_ms(request.delay_seconds, request.hourly_limit);

    Ok(request
        .recipients
        .iter()
        .enumerate()
        .map(|(i, recipient)| PlannedSend {
            recipient: recipient.clone(),
            send_at: request.start_at + Duration::milliseconds(spacing_ms as i64 * i as i64),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(recipients: &[&str], delay_seconds: u64, hourly_limit: u64) -> BatchRequest {
        BatchRequest {
            recipients: recipients.iter().map(ToString::to_string).collect(),
            subject: "Subject".to_string(),
            body: "Body".to_string(),
            html: None,
            start_at: Utc::now() + Duration::seconds(60),
            delay_seconds,
            hourly_limit,
        }
    }

    #[test]
    fn test_delay_only_spacing() {
        // delaySeconds=5, hourlyLimit=0, 3 recipients -> T0, T0+5s, T0+10s
        let req = request(&["a@example.com", "b@example.com", "c@example.com"], 5, 0);
        let plan = plan(&req).unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].send_at, req.start_at);
        assert_eq!(plan[1].send_at, req.start_at + Duration::milliseconds(5000));
        assert_eq!(plan[2].send_at, req.start_at + Duration::milliseconds(10_000));
    }

    #[test]
    fn test_hourly_cap_spacing() {
        // delaySeconds=0, hourlyLimit=100, 3 recipients -> spacing 36 s
        let req = request(&["a@example.com", "b@example.com", "c@example.com"], 0, 100);
        let plan = plan(&req).unwrap();

        assert_eq!(plan[0].send_at, req.start_at);
        assert_eq!(plan[1].send_at, req.start_at + Duration::milliseconds(36_000));
        assert_eq!(plan[2].send_at, req.start_at + Duration::milliseconds(72_000));
    }

    #[test]
    fn test_order_preserved_and_duplicates_spaced() {
        let req = request(&["dup@example.com", "other@example.com", "dup@example.com"], 1, 0);
        let plan = plan(&req).unwrap();

        assert_eq!(plan[0].recipient, "dup@example.com");
        assert_eq!(plan[1].recipient, "other@example.com");
        assert_eq!(plan[2].recipient, "dup@example.com");
        assert!(plan[0].send_at < plan[2].send_at);
    }

    #[test]
    fn test_single_recipient_fires_at_start() {
        let req = request(&["only@example.com"], 30, 10);
        let plan = plan(&req).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].send_at, req.start_at);
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert_eq!(plan(&request(&[], 0, 0)), Err(InvalidBatch::NoRecipients));
    }

    #[test]
    fn test_empty_subject_and_body_rejected() {
        let mut req = request(&["a@example.com"], 0, 0);
        req.subject = "  ".to_string();
        assert_eq!(plan(&req), Err(InvalidBatch::MissingSubject));

        let mut req = request(&["a@example.com"], 0, 0);
        req.body = String::new();
        assert_eq!(plan(&req), Err(InvalidBatch::MissingBody));
    }

    #[test]
    fn test_parse_start_time() {
        assert!(parse_start_time("2026-08-07T12:00:00Z").is_ok());
        assert!(parse_start_time("2026-08-07T12:00:00+02:00").is_ok());
        assert_eq!(
            parse_start_time("next tuesday"),
            Err(InvalidBatch::InvalidStartTime("next tuesday".to_string()))
        );
    }
}
