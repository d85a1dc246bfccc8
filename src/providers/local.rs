//! Local mailer for development and testing.
//!
//! Stores delivered emails in memory for programmatic assertions in tests,
//! and can be told to fail so error paths (retry, exhaustion) are testable.
//!
//! # Testing Usage
//!
//! ```rust,ignore
//! use herald::providers::LocalMailer;
//! use herald::testing::*;
//!
//! #[tokio::test]
//! async fn test_sends_advisory_email() {
//!     let mailer = LocalMailer::new();
//!
//!     // Code under test
//!     scheduler.process_due().await;
//!
//!     // Assertions
//!     assert_email_sent(&mailer);
//!     assert_email_to(&mailer, "user@example.com");
//!     assert_email_subject_contains(&mailer, "Advisory");
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::email::Email;
use crate::error::HeraldError;
use crate::mailer::{DeliveryResult, Mailer};

/// A captured email with metadata.
#[derive(Debug, Clone)]
pub struct CapturedEmail {
    /// Unique identifier for this capture.
    pub id: String,
    /// The email content.
    pub email: Email,
    /// When the email was "sent" (captured).
    pub sent_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    emails: Vec<CapturedEmail>,
    fail_with: Option<String>,
}

/// Local mailer that stores emails in memory.
///
/// Clones share the same capture buffer, so the scheduler can own one handle
/// while the test asserts through another.
#[derive(Clone, Default)]
pub struct LocalMailer {
    inner: Arc<RwLock<Inner>>,
}

impl LocalMailer {
    /// Create a new local mailer with an empty capture buffer.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Failure Simulation (for testing)
    // =========================================================================

    /// Configure the mailer to fail every delivery with an error message.
    ///
    /// ```rust,ignore
    /// let mailer = LocalMailer::new();
    /// mailer.set_failure("SMTP connection refused");
    ///
    /// let result = mailer.deliver(&email).await;
    /// assert!(result.is_err());
    /// ```
    pub fn set_failure(&self, message: impl Into<String>) {
        self.inner.write().fail_with = Some(message.into());
    }

    /// Clear the failure state.
    pub fn clear_failure(&self) {
        self.inner.write().fail_with = None;
    }

    // =========================================================================
    // Email Access (for testing assertions)
    // =========================================================================

    /// Get all captured emails (newest first).
    pub fn emails(&self) -> Vec<CapturedEmail> {
        let inner = self.inner.read();
        inner.emails.iter().rev().cloned().collect()
    }

    /// The most recently captured email, if any.
    pub fn last_email(&self) -> Option<CapturedEmail> {
        self.inner.read().emails.last().cloned()
    }

    /// Whether any email has been captured.
    pub fn has_emails(&self) -> bool {
        !self.inner.read().emails.is_empty()
    }

    /// Number of captured emails.
    pub fn count(&self) -> usize {
        self.inner.read().emails.len()
    }

    /// Clear all captured emails.
    pub fn clear(&self) {
        self.inner.write().emails.clear();
    }
}

#[async_trait]
impl Mailer for LocalMailer {
    async fn deliver(&self, email: &Email) -> Result<DeliveryResult, HeraldError> {
        let mut inner = self.inner.write();

        if let Some(ref message) = inner.fail_with {
            return Err(HeraldError::Transport(message.clone()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        inner.emails.push(CapturedEmail {
            id: id.clone(),
            email: email.clone(),
            sent_at: Utc::now(),
        });

        Ok(DeliveryResult::new(id))
    }

    fn provider_name(&self) -> &'static str {
        "local"
    }
}
