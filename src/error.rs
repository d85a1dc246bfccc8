//! Error types for herald.

use thiserror::Error;

/// Errors that can occur while scheduling, rendering, sending, or tracking.
#[derive(Debug, Clone, Error)]
pub enum HeraldError {
    /// Input rejected before it reaches the scheduler (past schedule time,
    /// empty recipient list, malformed filter, ...).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Invalid email address format.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Transport-level send failure (connection refused, relay rejected, ...).
    /// Retryable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A send attempt exceeded the per-attempt timeout. Retryable.
    #[error("Send attempt timed out after {0}s")]
    Timeout(u64),

    /// Template rendering failure. Never aborts a send; the worker falls
    /// back to the minimal document instead.
    #[error("Template error: {0}")]
    Template(String),

    /// A conditional update lost its race or a uniqueness constraint fired.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration error (missing env var, invalid value, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing required field (e.g., from address).
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Durable store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(String),
}

impl HeraldError {
    /// Create a not-found error for a named entity kind.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether a failed send attempt with this error may be retried.
    ///
    /// Only transport-level failures and timeouts are transient; a missing
    /// advisory or a validation failure will not heal on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for HeraldError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

#[cfg(feature = "smtp")]
impl From<lettre::error::Error> for HeraldError {
    fn from(err: lettre::error::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(feature = "smtp")]
impl From<lettre::transport::smtp::Error> for HeraldError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(feature = "smtp")]
impl From<lettre::address::AddressError> for HeraldError {
    fn from(err: lettre::address::AddressError) -> Self {
        Self::InvalidAddress(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_timeout_are_retryable() {
        assert!(HeraldError::Transport("connection refused".into()).is_retryable());
        assert!(HeraldError::Timeout(30).is_retryable());
    }

    #[test]
    fn not_found_and_validation_are_not_retryable() {
        assert!(!HeraldError::not_found("advisory", "adv-1").is_retryable());
        assert!(!HeraldError::Validation("empty recipient list".into()).is_retryable());
        assert!(!HeraldError::Template("missing slot".into()).is_retryable());
    }

    #[test]
    fn not_found_formats_kind_and_id() {
        let err = HeraldError::not_found("advisory", "adv-42");
        assert_eq!(err.to_string(), "advisory not found: adv-42");
    }
}
