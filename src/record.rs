//! Scheduled delivery records and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::{dedup_addresses, Address, ToAddress};
use crate::error::HeraldError;

/// Lifecycle state of a scheduled delivery.
///
/// `Pending` is the only non-terminal state; every transition out of it is
/// final. Terminal records are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A scheduled advisory delivery and its audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Unique identifier, assigned at creation.
    pub id: String,
    /// Opaque advisory reference, resolved through `AdvisoryLookup` at send
    /// time.
    pub advisory_ref: String,
    /// Primary recipients (non-empty, order preserved).
    pub to: Vec<Address>,
    /// Carbon copy recipients (deduplicated, order irrelevant).
    pub cc: Vec<Address>,
    /// Blind carbon copy recipients (deduplicated, order irrelevant).
    pub bcc: Vec<Address>,
    pub subject: String,
    /// Free text from the operator, merged into the rendered body.
    pub operator_message: Option<String>,
    /// When to send. Immutable once the record leaves `Pending`.
    pub scheduled_at: DateTime<Utc>,
    pub state: DeliveryState,
    /// Failed send attempts so far. Bounded by the scheduler's retry limit.
    pub retry_count: u32,
    /// Set only when `state` is `Failed`.
    pub error_message: Option<String>,
    /// Set only when `state` is `Sent`.
    pub sent_at: Option<DateTime<Utc>>,
    /// Engagement-tracking identifier, assigned at most once on the first
    /// render. Unique across all records.
    pub tracking_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Request to create a new delivery record.
///
/// ```
/// use herald::DeliveryRequest;
/// use chrono::{Duration, Utc};
///
/// let request = DeliveryRequest::new("adv-1", Utc::now() + Duration::hours(2))
///     .to("soc@example.com")
///     .cc("ciso@example.com")
///     .subject("THREAT ALERT: OpenSSL heap overflow")
///     .operator_message("Patch before Friday.")
///     .created_by("operator-7");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub advisory_ref: String,
    pub to: Vec<Address>,
    #[serde(default)]
    pub cc: Vec<Address>,
    #[serde(default)]
    pub bcc: Vec<Address>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub operator_message: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
}

impl DeliveryRequest {
    pub fn new(advisory_ref: impl Into<String>, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            advisory_ref: advisory_ref.into(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            operator_message: None,
            scheduled_at,
            created_by: String::new(),
        }
    }

    /// Add a primary recipient.
    pub fn to(mut self, addr: impl ToAddress) -> Self {
        self.to.push(addr.to_address());
        self
    }

    /// Add a CC recipient.
    pub fn cc(mut self, addr: impl ToAddress) -> Self {
        self.cc.push(addr.to_address());
        self
    }

    /// Add a BCC recipient.
    pub fn bcc(mut self, addr: impl ToAddress) -> Self {
        self.bcc.push(addr.to_address());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn operator_message(mut self, message: impl Into<String>) -> Self {
        self.operator_message = Some(message.into());
        self
    }

    pub fn created_by(mut self, user: impl Into<String>) -> Self {
        self.created_by = user.into();
        self
    }

    /// Validate the request and materialize a `Pending` record.
    ///
    /// Rejects an empty `to` list and a `scheduled_at` that is not strictly
    /// in the future. Duplicates in cc/bcc are silently dropped.
    pub fn into_record(self, now: DateTime<Utc>) -> Result<DeliveryRecord, HeraldError> {
        if self.to.is_empty() {
            return Err(HeraldError::Validation(
                "at least one recipient is required".into(),
            ));
        }
        if self.scheduled_at <= now {
            return Err(HeraldError::Validation(format!(
                "scheduled_at must be in the future (got {})",
                self.scheduled_at.to_rfc3339()
            )));
        }

        Ok(DeliveryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            advisory_ref: self.advisory_ref,
            to: self.to,
            cc: dedup_addresses(self.cc),
            bcc: dedup_addresses(self.bcc),
            subject: self.subject,
            operator_message: self.operator_message,
            scheduled_at: self.scheduled_at,
            state: DeliveryState::Pending,
            retry_count: 0,
            error_message: None,
            sent_at: None,
            tracking_id: None,
            created_by: self.created_by,
            created_at: now,
        })
    }
}

/// Caller-side update of a Pending record. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryUpdate {
    pub to: Option<Vec<Address>>,
    pub cc: Option<Vec<Address>>,
    pub bcc: Option<Vec<Address>>,
    pub subject: Option<String>,
    pub operator_message: Option<Option<String>>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl DeliveryUpdate {
    pub fn is_empty(&self) -> bool {
        self.to.is_none()
            && self.cc.is_none()
            && self.bcc.is_none()
            && self.subject.is_none()
            && self.operator_message.is_none()
            && self.scheduled_at.is_none()
    }

    /// Validate against the current record and apply.
    ///
    /// The record must still be `Pending`; a new `scheduled_at` must be
    /// strictly in the future; a new `to` list must be non-empty.
    pub fn apply(
        self,
        record: &mut DeliveryRecord,
        now: DateTime<Utc>,
    ) -> Result<(), HeraldError> {
        if record.state != DeliveryState::Pending {
            return Err(HeraldError::Conflict(format!(
                "record {} is {} and no longer mutable",
                record.id, record.state
            )));
        }
        if let Some(ref to) = self.to {
            if to.is_empty() {
                return Err(HeraldError::Validation(
                    "at least one recipient is required".into(),
                ));
            }
        }
        if let Some(at) = self.scheduled_at {
            if at <= now {
                return Err(HeraldError::Validation(format!(
                    "scheduled_at must be in the future (got {})",
                    at.to_rfc3339()
                )));
            }
        }

        if let Some(to) = self.to {
            record.to = to;
        }
        if let Some(cc) = self.cc {
            record.cc = dedup_addresses(cc);
        }
        if let Some(bcc) = self.bcc {
            record.bcc = dedup_addresses(bcc);
        }
        if let Some(subject) = self.subject {
            record.subject = subject;
        }
        if let Some(message) = self.operator_message {
            record.operator_message = message;
        }
        if let Some(at) = self.scheduled_at {
            record.scheduled_at = at;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn future_request() -> DeliveryRequest {
        DeliveryRequest::new("adv-1", Utc::now() + Duration::hours(1))
            .to("a@example.com")
            .subject("Alert")
            .created_by("tester")
    }

    #[test]
    fn into_record_starts_pending_with_zero_retries() {
        let record = future_request().into_record(Utc::now()).unwrap();
        assert_eq!(record.state, DeliveryState::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(record.sent_at.is_none());
        assert!(record.tracking_id.is_none());
        assert!(!record.id.is_empty());
    }

    #[test]
    fn into_record_rejects_past_schedule() {
        let now = Utc::now();
        let request = DeliveryRequest::new("adv-1", now - Duration::seconds(1)).to("a@example.com");
        let err = request.into_record(now).unwrap_err();
        assert!(matches!(err, HeraldError::Validation(_)));
    }

    #[test]
    fn into_record_rejects_empty_recipients() {
        let request = DeliveryRequest::new("adv-1", Utc::now() + Duration::hours(1));
        assert!(request.into_record(Utc::now()).is_err());
    }

    #[test]
    fn into_record_dedups_cc_and_bcc_but_not_to() {
        let record = future_request()
            .to("a@example.com")
            .cc("x@example.com")
            .cc("X@example.com")
            .bcc("y@example.com")
            .bcc("y@example.com")
            .into_record(Utc::now())
            .unwrap();
        // `to` keeps duplicates (ordered list); cc/bcc are sets.
        assert_eq!(record.to.len(), 2);
        assert_eq!(record.cc.len(), 1);
        assert_eq!(record.bcc.len(), 1);
    }

    #[test]
    fn update_rejected_for_terminal_record() {
        let mut record = future_request().into_record(Utc::now()).unwrap();
        record.state = DeliveryState::Sent;

        let update = DeliveryUpdate {
            subject: Some("New subject".into()),
            ..Default::default()
        };
        let err = update.apply(&mut record, Utc::now()).unwrap_err();
        assert!(matches!(err, HeraldError::Conflict(_)));
        assert_eq!(record.subject, "Alert");
    }

    #[test]
    fn update_applies_fields_to_pending_record() {
        let mut record = future_request().into_record(Utc::now()).unwrap();
        let new_time = Utc::now() + Duration::hours(3);

        let update = DeliveryUpdate {
            subject: Some("Revised".into()),
            scheduled_at: Some(new_time),
            operator_message: Some(Some("handle with care".into())),
            ..Default::default()
        };
        update.apply(&mut record, Utc::now()).unwrap();
        assert_eq!(record.subject, "Revised");
        assert_eq!(record.scheduled_at, new_time);
        assert_eq!(record.operator_message.as_deref(), Some("handle with care"));
    }

    #[test]
    fn update_rejects_past_reschedule() {
        let mut record = future_request().into_record(Utc::now()).unwrap();
        let update = DeliveryUpdate {
            scheduled_at: Some(Utc::now() - Duration::minutes(5)),
            ..Default::default()
        };
        assert!(update.apply(&mut record, Utc::now()).is_err());
    }
}
