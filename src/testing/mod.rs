//! Testing utilities
//!
//! A capturing, scriptable email sender and an in-memory status store so
//! the dispatch path can be exercised without SMTP or a database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::email::{Email, EmailError, EmailSender};
use crate::jobs::StatusStore;

#[derive(Debug, Default)]
struct MockState {
    sent: Vec<Email>,
    attempts: usize,
    fail_first: usize,
    always_fail: bool,
    hang: bool,
}

/// Mock email sender: captures sent emails and can be scripted to fail.
#[derive(Debug, Clone, Default)]
pub struct MockEmailSender {
    state: Arc<Mutex<MockState>>,
}

impl MockEmailSender {
    /// A sender that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender whose first `n` attempts fail, then succeed.
    #[must_use]
    pub fn failing_times(n: usize) -> Self {
        let mock = Self::new();
        mock.state.lock().unwrap().fail_first = n;
        mock
    }

    /// A sender that fails every attempt.
    #[must_use]
    pub fn always_failing() -> Self {
        let mock = Self::new();
        mock.state.lock().unwrap().always_fail = true;
        mock
    }

    /// A sender that never resolves, for timeout tests.
    #[must_use]
    pub fn hanging() -> Self {
        let mock = Self::new();
        mock.state.lock().unwrap().hang = true;
        mock
    }

    /// Emails delivered successfully.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.state.lock().unwrap().sent.len()
    }

    /// Attempts made, successful or not.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// The most recently delivered email.
    #[must_use]
    pub fn last_sent(&self) -> Option<Email> {
        self.state.lock().unwrap().sent.last().cloned()
    }

    /// Whether any email was delivered to an address.
    #[must_use]
    pub fn was_sent_to(&self, address: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .any(|email| email.to == address)
    }
}

#[async_trait]
impl EmailSender for MockEmailSender {
    async fn send(&self, email: Email) -> Result<(), EmailError> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;
            if state.hang {
                true
            } else if state.always_fail || state.attempts <= state.fail_first {
                return Err(EmailError::smtp("scripted failure"));
            } else {
                state.sent.push(email);
                false
            }
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// In-memory status store recording the latest status per record id.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusStore {
    statuses: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStatusStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest status recorded for a record id.
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<String> {
        self.statuses.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn mark_sent(&self, id: &str, _sent_at: DateTime<Utc>) -> Result<(), sqlx::Error> {
        self.statuses
            .lock()
            .unwrap()
            .insert(id.to_string(), "sent".to_string());
        Ok(())
    }

    async fn mark_failed(&self, id: &str) -> Result<(), sqlx::Error> {
        self.statuses
            .lock()
            .unwrap()
            .insert(id.to_string(), "failed".to_string());
        Ok(())
    }
}
