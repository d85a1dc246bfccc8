//! Mailer trait and delivery result types.
//!
//! # Architecture: Why `async_trait`?
//!
//! This module uses `#[async_trait]` instead of native async traits because
//! the scheduler holds its transport as `Arc<dyn Mailer>`. Native async
//! traits are not object-safe; the macro boxes futures, enabling dynamic
//! dispatch at the cost of one heap allocation per call. Email sending is
//! I/O-bound - network latency completely dominates that allocation - and
//! dynamic dispatch is what lets the same scheduler run against an SMTP
//! relay in production and a `LocalMailer` in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::email::Email;
use crate::error::HeraldError;

/// Result of a successful email delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Message ID assigned by the provider
    pub message_id: String,
    /// Optional provider-specific response data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_response: Option<serde_json::Value>,
}

impl DeliveryResult {
    /// Create a new delivery result with just a message ID.
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            provider_response: None,
        }
    }

    /// Create a delivery result with provider response.
    pub fn with_response(message_id: impl Into<String>, response: serde_json::Value) -> Self {
        Self {
            message_id: message_id.into(),
            provider_response: Some(response),
        }
    }
}

/// Trait for email delivery providers.
///
/// The scheduler treats the mailer as an opaque, fallible, possibly slow
/// capability: it hands over a fully-rendered message and interprets any
/// error as a transient transport failure subject to the retry policy.
///
/// # Example
///
/// ```ignore
/// use herald::{Email, Mailer};
/// use herald::providers::SmtpMailer;
///
/// let mailer = SmtpMailer::new("smtp.example.com", 587)
///     .credentials("user", "pass")
///     .build();
///
/// let email = Email::new()
///     .from("alerts@example.com")
///     .to("recipient@example.com")
///     .subject("Advisory")
///     .html_body("<h1>...</h1>");
///
/// let result = mailer.deliver(&email).await?;
/// println!("Sent with ID: {}", result.message_id);
/// ```
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send a single email.
    ///
    /// Returns the message ID on success.
    async fn deliver(&self, email: &Email) -> Result<DeliveryResult, HeraldError>;

    /// Get the provider name (for logging/debugging).
    fn provider_name(&self) -> &'static str {
        "unknown"
    }

    /// Validate configuration.
    ///
    /// Called at startup to verify required configuration is present.
    /// Override in providers that require specific config (credentials, etc.).
    fn validate_config(&self) -> Result<(), HeraldError> {
        Ok(())
    }
}

/// Extension trait for optional mailer operations.
pub trait MailerExt: Mailer {
    /// Validate an email before sending.
    fn validate(&self, email: &Email) -> Result<(), HeraldError> {
        if email.from.is_none() {
            return Err(HeraldError::MissingField("from"));
        }
        if email.to.is_empty() {
            return Err(HeraldError::MissingField("to"));
        }
        Ok(())
    }
}

// Auto-implement MailerExt for all Mailers
impl<T: Mailer> MailerExt for T {}
