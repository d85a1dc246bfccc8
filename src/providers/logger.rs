//! Logger mailer that only logs emails.
//!
//! Useful for staging environments or when you want to see what would be sent
//! without actually sending or storing emails.

use async_trait::async_trait;

use crate::email::Email;
use crate::error::HeraldError;
use crate::mailer::{DeliveryResult, Mailer};

/// Logger mailer that emits tracing events for emails.
pub struct LoggerMailer {
    /// If true, log full email details. If false, just log recipient summary.
    log_full: bool,
}

impl LoggerMailer {
    /// Create a logger mailer with brief output (just recipients).
    pub fn new() -> Self {
        Self { log_full: false }
    }

    /// Create a logger mailer with full email details.
    pub fn full() -> Self {
        Self { log_full: true }
    }
}

impl Default for LoggerMailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mailer for LoggerMailer {
    async fn deliver(&self, email: &Email) -> Result<DeliveryResult, HeraldError> {
        let message_id = uuid::Uuid::new_v4().to_string();

        if self.log_full {
            tracing::info!(
                message_id = %message_id,
                from = ?email.from.as_ref().map(|a| a.formatted()),
                to = ?email.to.iter().map(|a| a.formatted()).collect::<Vec<_>>(),
                cc = ?email.cc.iter().map(|a| a.formatted()).collect::<Vec<_>>(),
                bcc = ?email.bcc.iter().map(|a| a.formatted()).collect::<Vec<_>>(),
                subject = %email.subject,
                has_html = email.html_body.is_some(),
                has_text = email.text_body.is_some(),
                "Email logged (full)"
            );

            if let Some(ref html) = email.html_body {
                tracing::debug!(body = %html, "HTML body");
            }
        } else {
            tracing::info!(
                message_id = %message_id,
                to = ?email.to.iter().map(|a| &a.email).collect::<Vec<_>>(),
                subject = %email.subject,
                "Email logged"
            );
        }

        Ok(DeliveryResult::new(message_id))
    }

    fn provider_name(&self) -> &'static str {
        "logger"
    }
}
