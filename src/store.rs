//! Storage traits and in-memory implementations for delivery records and jobs.
//!
//! The traits model the durable substrate abstractly: any store that can do
//! atomic compare-and-swap updates on a single document can implement them.
//! Every state transition here is a conditional update that checks the
//! current state inside the store's critical section - the preconditions are
//! enforced by the store itself, not trusted from the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::HeraldError;
use crate::record::{DeliveryRecord, DeliveryRequest, DeliveryState, DeliveryUpdate};

/// Filter for listing delivery records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryFilter {
    pub state: Option<DeliveryState>,
    pub created_by: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Outcome of recording a failed send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Attempt counted; the record stays Pending and may be retried.
    Retrying { retry_count: u32 },
    /// The retry budget is exhausted; the record is now Failed.
    Exhausted,
    /// The record was no longer Pending (cancelled or already terminal);
    /// nothing was changed.
    Stale,
}

/// Durable store for [`DeliveryRecord`]s.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Validate and persist a new record in `Pending` state.
    async fn create(&self, request: DeliveryRequest) -> Result<DeliveryRecord, HeraldError>;

    async fn get(&self, id: &str) -> Result<Option<DeliveryRecord>, HeraldError>;

    /// List records, newest first.
    async fn list(&self, filter: DeliveryFilter) -> Result<Vec<DeliveryRecord>, HeraldError>;

    /// Apply a caller update. Rejected unless the record is `Pending`.
    async fn update(
        &self,
        id: &str,
        update: DeliveryUpdate,
    ) -> Result<DeliveryRecord, HeraldError>;

    /// Cancel a `Pending` record. Rejected for terminal records.
    async fn cancel(&self, id: &str) -> Result<DeliveryRecord, HeraldError>;

    /// Delete a record. Ordinary deletion is restricted to `Pending`
    /// records; `elevated` callers may also remove Sent/Failed/Cancelled
    /// ones. Returns false when the record does not exist.
    async fn delete(&self, id: &str, elevated: bool) -> Result<bool, HeraldError>;

    /// Pending records scheduled at or before `cutoff`, oldest first.
    /// Backs the due-job scan and the abandoned-record sweep.
    async fn list_due(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeliveryRecord>, HeraldError>;

    /// Assign the tracking id if none is set yet. Returns the effective
    /// tracking id, which may differ from `tracking_id` if another attempt
    /// won the race (set-once semantics).
    async fn assign_tracking_id(
        &self,
        id: &str,
        tracking_id: &str,
    ) -> Result<String, HeraldError>;

    /// Transition `Pending -> Sent` and set `sent_at`. Returns false (and
    /// changes nothing) if the record is no longer Pending - a send whose
    /// record was cancelled mid-flight is discarded here.
    async fn mark_sent(&self, id: &str, sent_at: DateTime<Utc>) -> Result<bool, HeraldError>;

    /// Transition `Pending -> Failed` directly, without touching the retry
    /// counter. Used for non-retryable failures (missing advisory) and the
    /// abandoned-record sweep. Returns false if the record is not Pending.
    async fn mark_failed(&self, id: &str, error: &str) -> Result<bool, HeraldError>;

    /// Count a failed attempt: increment `retry_count` and, when the
    /// configured maximum is reached, transition to `Failed`.
    async fn record_failure(
        &self,
        id: &str,
        error: &str,
        max_retries: u32,
    ) -> Result<FailureOutcome, HeraldError>;
}

/// A scheduler job bound 1:1 to a Pending delivery record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Id of the bound delivery record.
    pub record_id: String,
    /// When the job becomes eligible for a claim. Equals the record's
    /// `scheduled_at` at creation; advanced on retry, or to now for
    /// immediate dispatch.
    pub run_at: DateTime<Utc>,
    /// Completed (failed) attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Claim marker. `Some` while a worker owns the job.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Disabled jobs are never claimed again; set when the bound record
    /// reaches a terminal state.
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Durable store for [`Job`]s with atomic claim semantics.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create (or reset) the job bound to a record.
    async fn enqueue(&self, record_id: &str, run_at: DateTime<Utc>) -> Result<(), HeraldError>;

    async fn get(&self, record_id: &str) -> Result<Option<Job>, HeraldError>;

    /// Jobs eligible for a claim at `now` (enabled, unclaimed, due),
    /// oldest first.
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, HeraldError>;

    /// Atomically claim a job: succeeds only when the job exists, is
    /// enabled, unclaimed, and due. Exactly one concurrent caller can win.
    async fn claim(&self, record_id: &str, now: DateTime<Utc>) -> Result<bool, HeraldError>;

    /// Release a claimed job for a retry: clears the claim marker, advances
    /// `run_at`, bumps `attempts`, and records the error.
    async fn release_for_retry(
        &self,
        record_id: &str,
        next_run: DateTime<Utc>,
        error: &str,
    ) -> Result<(), HeraldError>;

    /// Permanently disable the job (bound record reached a terminal state).
    async fn disable(&self, record_id: &str) -> Result<(), HeraldError>;

    /// Remove the job entirely. Returns false when absent.
    async fn remove(&self, record_id: &str) -> Result<bool, HeraldError>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// Thread-safe in-memory [`DeliveryStore`].
///
/// Reference implementation for tests and development; all conditional
/// updates run under a single write lock, giving the same atomicity a
/// durable store provides via compare-and-swap.
#[derive(Default)]
pub struct MemoryDeliveryStore {
    records: RwLock<HashMap<String, DeliveryRecord>>,
    /// Insertion order of record ids, for stable newest-first listings.
    order: RwLock<Vec<String>>,
}

impl MemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store wrapped in an Arc for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    async fn create(&self, request: DeliveryRequest) -> Result<DeliveryRecord, HeraldError> {
        let record = request.into_record(Utc::now())?;
        let mut records = self.records.write();
        let mut order = self.order.write();
        order.push(record.id.clone());
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<DeliveryRecord>, HeraldError> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn list(&self, filter: DeliveryFilter) -> Result<Vec<DeliveryRecord>, HeraldError> {
        let records = self.records.read();
        let order = self.order.read();

        let matches = order
            .iter()
            .rev()
            .filter_map(|id| records.get(id))
            .filter(|r| filter.state.map_or(true, |s| r.state == s))
            .filter(|r| {
                filter
                    .created_by
                    .as_ref()
                    .map_or(true, |u| &r.created_by == u)
            })
            .cloned();

        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(matches.skip(offset).take(limit).collect())
    }

    async fn update(
        &self,
        id: &str,
        update: DeliveryUpdate,
    ) -> Result<DeliveryRecord, HeraldError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| HeraldError::not_found("delivery record", id))?;
        update.apply(record, Utc::now())?;
        Ok(record.clone())
    }

    async fn cancel(&self, id: &str) -> Result<DeliveryRecord, HeraldError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| HeraldError::not_found("delivery record", id))?;
        if record.state != DeliveryState::Pending {
            return Err(HeraldError::Conflict(format!(
                "record {} is {} and cannot be cancelled",
                id, record.state
            )));
        }
        record.state = DeliveryState::Cancelled;
        Ok(record.clone())
    }

    async fn delete(&self, id: &str, elevated: bool) -> Result<bool, HeraldError> {
        let mut records = self.records.write();
        let Some(record) = records.get(id) else {
            return Ok(false);
        };
        if !elevated && record.state != DeliveryState::Pending {
            return Err(HeraldError::Conflict(format!(
                "record {} is {}; deleting non-pending records requires elevated privilege",
                id, record.state
            )));
        }
        records.remove(id);
        self.order.write().retain(|x| x != id);
        Ok(true)
    }

    async fn list_due(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeliveryRecord>, HeraldError> {
        let records = self.records.read();
        let mut due: Vec<DeliveryRecord> = records
            .values()
            .filter(|r| r.state == DeliveryState::Pending && r.scheduled_at <= cutoff)
            .cloned()
            .collect();
        due.sort_by_key(|r| r.scheduled_at);
        Ok(due)
    }

    async fn assign_tracking_id(
        &self,
        id: &str,
        tracking_id: &str,
    ) -> Result<String, HeraldError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| HeraldError::not_found("delivery record", id))?;
        match record.tracking_id {
            Some(ref existing) => Ok(existing.clone()),
            None => {
                record.tracking_id = Some(tracking_id.to_string());
                Ok(tracking_id.to_string())
            }
        }
    }

    async fn mark_sent(&self, id: &str, sent_at: DateTime<Utc>) -> Result<bool, HeraldError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| HeraldError::not_found("delivery record", id))?;
        if record.state != DeliveryState::Pending {
            return Ok(false);
        }
        record.state = DeliveryState::Sent;
        record.sent_at = Some(sent_at);
        Ok(true)
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<bool, HeraldError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| HeraldError::not_found("delivery record", id))?;
        if record.state != DeliveryState::Pending {
            return Ok(false);
        }
        record.state = DeliveryState::Failed;
        record.error_message = Some(error.to_string());
        Ok(true)
    }

    async fn record_failure(
        &self,
        id: &str,
        error: &str,
        max_retries: u32,
    ) -> Result<FailureOutcome, HeraldError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| HeraldError::not_found("delivery record", id))?;
        if record.state != DeliveryState::Pending {
            return Ok(FailureOutcome::Stale);
        }
        record.retry_count += 1;
        if record.retry_count >= max_retries {
            record.state = DeliveryState::Failed;
            record.error_message = Some(error.to_string());
            Ok(FailureOutcome::Exhausted)
        } else {
            Ok(FailureOutcome::Retrying {
                retry_count: record.retry_count,
            })
        }
    }
}

/// Thread-safe in-memory [`JobStore`].
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store wrapped in an Arc for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, record_id: &str, run_at: DateTime<Utc>) -> Result<(), HeraldError> {
        let mut jobs = self.jobs.write();
        jobs.insert(
            record_id.to_string(),
            Job {
                record_id: record_id.to_string(),
                run_at,
                attempts: 0,
                last_error: None,
                claimed_at: None,
                disabled: false,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, record_id: &str) -> Result<Option<Job>, HeraldError> {
        Ok(self.jobs.read().get(record_id).cloned())
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, HeraldError> {
        let jobs = self.jobs.read();
        let mut due: Vec<Job> = jobs
            .values()
            .filter(|j| !j.disabled && j.claimed_at.is_none() && j.run_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|j| j.run_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn claim(&self, record_id: &str, now: DateTime<Utc>) -> Result<bool, HeraldError> {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(record_id) else {
            return Ok(false);
        };
        if job.disabled || job.claimed_at.is_some() || job.run_at > now {
            return Ok(false);
        }
        job.claimed_at = Some(now);
        Ok(true)
    }

    async fn release_for_retry(
        &self,
        record_id: &str,
        next_run: DateTime<Utc>,
        error: &str,
    ) -> Result<(), HeraldError> {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(record_id) {
            job.claimed_at = None;
            job.run_at = next_run;
            job.attempts += 1;
            job.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn disable(&self, record_id: &str) -> Result<(), HeraldError> {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(record_id) {
            job.disabled = true;
            job.claimed_at = None;
        }
        Ok(())
    }

    async fn remove(&self, record_id: &str) -> Result<bool, HeraldError> {
        Ok(self.jobs.write().remove(record_id).is_some())
    }
}

#[async_trait]
impl DeliveryStore for Arc<MemoryDeliveryStore> {
    async fn create(&self, request: DeliveryRequest) -> Result<DeliveryRecord, HeraldError> {
        (**self).create(request).await
    }
    async fn get(&self, id: &str) -> Result<Option<DeliveryRecord>, HeraldError> {
        (**self).get(id).await
    }
    async fn list(&self, filter: DeliveryFilter) -> Result<Vec<DeliveryRecord>, HeraldError> {
        (**self).list(filter).await
    }
    async fn update(
        &self,
        id: &str,
        update: DeliveryUpdate,
    ) -> Result<DeliveryRecord, HeraldError> {
        (**self).update(id, update).await
    }
    async fn cancel(&self, id: &str) -> Result<DeliveryRecord, HeraldError> {
        (**self).cancel(id).await
    }
    async fn delete(&self, id: &str, elevated: bool) -> Result<bool, HeraldError> {
        (**self).delete(id, elevated).await
    }
    async fn list_due(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeliveryRecord>, HeraldError> {
        (**self).list_due(cutoff).await
    }
    async fn assign_tracking_id(
        &self,
        id: &str,
        tracking_id: &str,
    ) -> Result<String, HeraldError> {
        (**self).assign_tracking_id(id, tracking_id).await
    }
    async fn mark_sent(&self, id: &str, sent_at: DateTime<Utc>) -> Result<bool, HeraldError> {
        (**self).mark_sent(id, sent_at).await
    }
    async fn mark_failed(&self, id: &str, error: &str) -> Result<bool, HeraldError> {
        (**self).mark_failed(id, error).await
    }
    async fn record_failure(
        &self,
        id: &str,
        error: &str,
        max_retries: u32,
    ) -> Result<FailureOutcome, HeraldError> {
        (**self).record_failure(id, error, max_retries).await
    }
}

#[async_trait]
impl JobStore for Arc<MemoryJobStore> {
    async fn enqueue(&self, record_id: &str, run_at: DateTime<Utc>) -> Result<(), HeraldError> {
        (**self).enqueue(record_id, run_at).await
    }
    async fn get(&self, record_id: &str) -> Result<Option<Job>, HeraldError> {
        (**self).get(record_id).await
    }
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, HeraldError> {
        (**self).due(now, limit).await
    }
    async fn claim(&self, record_id: &str, now: DateTime<Utc>) -> Result<bool, HeraldError> {
        (**self).claim(record_id, now).await
    }
    async fn release_for_retry(
        &self,
        record_id: &str,
        next_run: DateTime<Utc>,
        error: &str,
    ) -> Result<(), HeraldError> {
        (**self).release_for_retry(record_id, next_run, error).await
    }
    async fn disable(&self, record_id: &str) -> Result<(), HeraldError> {
        (**self).disable(record_id).await
    }
    async fn remove(&self, record_id: &str) -> Result<bool, HeraldError> {
        (**self).remove(record_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DeliveryRequest;
    use chrono::Duration;

    fn request() -> DeliveryRequest {
        DeliveryRequest::new("adv-1", Utc::now() + Duration::hours(1))
            .to("a@example.com")
            .subject("Alert")
            .created_by("tester")
    }

    #[tokio::test]
    async fn mark_sent_is_a_cas_on_pending() {
        let store = MemoryDeliveryStore::new();
        let record = store.create(request()).await.unwrap();

        assert!(store.mark_sent(&record.id, Utc::now()).await.unwrap());
        // Second transition is a no-op: the record is already terminal.
        assert!(!store.mark_sent(&record.id, Utc::now()).await.unwrap());

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, DeliveryState::Sent);
        assert!(stored.sent_at.is_some());
    }

    #[tokio::test]
    async fn mark_sent_refused_after_cancel() {
        let store = MemoryDeliveryStore::new();
        let record = store.create(request()).await.unwrap();

        store.cancel(&record.id).await.unwrap();
        assert!(!store.mark_sent(&record.id, Utc::now()).await.unwrap());

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, DeliveryState::Cancelled);
        assert!(stored.sent_at.is_none());
    }

    #[tokio::test]
    async fn record_failure_counts_up_to_the_bound() {
        let store = MemoryDeliveryStore::new();
        let record = store.create(request()).await.unwrap();

        assert_eq!(
            store.record_failure(&record.id, "boom", 3).await.unwrap(),
            FailureOutcome::Retrying { retry_count: 1 }
        );
        assert_eq!(
            store.record_failure(&record.id, "boom", 3).await.unwrap(),
            FailureOutcome::Retrying { retry_count: 2 }
        );
        assert_eq!(
            store.record_failure(&record.id, "boom", 3).await.unwrap(),
            FailureOutcome::Exhausted
        );

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, DeliveryState::Failed);
        assert_eq!(stored.retry_count, 3);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));

        // Further failures against the terminal record are stale.
        assert_eq!(
            store.record_failure(&record.id, "boom", 3).await.unwrap(),
            FailureOutcome::Stale
        );
    }

    #[tokio::test]
    async fn assign_tracking_id_is_set_once() {
        let store = MemoryDeliveryStore::new();
        let record = store.create(request()).await.unwrap();

        let first = store
            .assign_tracking_id(&record.id, "et_aaa")
            .await
            .unwrap();
        let second = store
            .assign_tracking_id(&record.id, "et_bbb")
            .await
            .unwrap();
        assert_eq!(first, "et_aaa");
        assert_eq!(second, "et_aaa");
    }

    #[tokio::test]
    async fn ordinary_delete_restricted_to_pending() {
        let store = MemoryDeliveryStore::new();
        let record = store.create(request()).await.unwrap();
        store.mark_sent(&record.id, Utc::now()).await.unwrap();

        assert!(store.delete(&record.id, false).await.is_err());
        assert!(store.delete(&record.id, true).await.unwrap());
        assert!(store.get(&record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_due_returns_pending_past_cutoff_oldest_first() {
        let store = MemoryDeliveryStore::new();
        let r1 = store.create(request()).await.unwrap();
        let _r2 = store
            .create(
                DeliveryRequest::new("adv-2", Utc::now() + Duration::hours(5))
                    .to("b@example.com"),
            )
            .await
            .unwrap();

        let due = store
            .list_due(Utc::now() + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, r1.id);
    }

    #[tokio::test]
    async fn job_claim_is_exclusive() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        store.enqueue("rec-1", now - Duration::seconds(1)).await.unwrap();

        assert!(store.claim("rec-1", now).await.unwrap());
        // A second claim on the same job must lose.
        assert!(!store.claim("rec-1", now).await.unwrap());
    }

    #[tokio::test]
    async fn job_claim_refused_before_run_at_and_when_disabled() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        store.enqueue("rec-1", now + Duration::hours(1)).await.unwrap();
        assert!(!store.claim("rec-1", now).await.unwrap());

        store.enqueue("rec-2", now - Duration::seconds(1)).await.unwrap();
        store.disable("rec-2").await.unwrap();
        assert!(!store.claim("rec-2", now).await.unwrap());
        assert!(store.due(now, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn release_for_retry_reopens_the_job_later() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        store.enqueue("rec-1", now).await.unwrap();
        assert!(store.claim("rec-1", now).await.unwrap());

        let next = now + Duration::minutes(2);
        store
            .release_for_retry("rec-1", next, "relay unavailable")
            .await
            .unwrap();

        let job = store.get("rec-1").await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.run_at, next);
        assert_eq!(job.last_error.as_deref(), Some("relay unavailable"));
        assert!(job.claimed_at.is_none());

        assert!(!store.claim("rec-1", now).await.unwrap());
        assert!(store.claim("rec-1", next).await.unwrap());
    }
}
