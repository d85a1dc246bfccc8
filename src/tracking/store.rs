//! Tracking store trait and in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::HeraldError;

use super::model::{AnalyticsFilter, EventType, TrackingEvent, TrackingRecord};

/// Durable store for tracking records and their event logs.
///
/// Records and events live in separate collections: the record carries the
/// rolling counters for cheap queries, the event log is the append-only
/// audit trail. `insert_record` must enforce tracking-id uniqueness the way
/// a unique index would.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Insert a new record. Fails with [`HeraldError::Conflict`] when the
    /// tracking id is already taken.
    async fn insert_record(&self, record: TrackingRecord) -> Result<(), HeraldError>;

    async fn get_record(&self, tracking_id: &str)
        -> Result<Option<TrackingRecord>, HeraldError>;

    /// Whether an event with this dedup hash has been counted already.
    async fn has_event_hash(&self, hash: &str) -> Result<bool, HeraldError>;

    /// Append an event to the log.
    async fn append_event(&self, event: TrackingEvent) -> Result<(), HeraldError>;

    /// Events for one identifier, newest first.
    async fn events_for(&self, tracking_id: &str) -> Result<Vec<TrackingEvent>, HeraldError>;

    /// Fold an event into the record's rolling counters. Single-document
    /// atomic update; a missing record is a silent no-op.
    async fn apply_metrics(
        &self,
        tracking_id: &str,
        event_type: EventType,
        unique: bool,
        at: DateTime<Utc>,
    ) -> Result<(), HeraldError>;

    /// All records matching the filter, newest first (pagination is the
    /// caller's concern; aggregates need the full match set).
    async fn query(&self, filter: &AnalyticsFilter) -> Result<Vec<TrackingRecord>, HeraldError>;

    /// Delete records and events created before `cutoff`. Returns
    /// (deleted records, deleted events).
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<(u64, u64), HeraldError>;
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, TrackingRecord>,
    /// Insertion order of tracking ids, for stable newest-first queries.
    order: Vec<String>,
    events: Vec<TrackingEvent>,
    seen_hashes: HashSet<String>,
}

/// Thread-safe in-memory [`TrackingStore`].
#[derive(Default)]
pub struct MemoryTrackingStore {
    inner: RwLock<Inner>,
}

impl MemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store wrapped in an Arc for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl TrackingStore for MemoryTrackingStore {
    async fn insert_record(&self, record: TrackingRecord) -> Result<(), HeraldError> {
        let mut inner = self.inner.write();
        if inner.records.contains_key(&record.tracking_id) {
            return Err(HeraldError::Conflict(format!(
                "tracking id {} already exists",
                record.tracking_id
            )));
        }
        inner.order.push(record.tracking_id.clone());
        inner.records.insert(record.tracking_id.clone(), record);
        Ok(())
    }

    async fn get_record(
        &self,
        tracking_id: &str,
    ) -> Result<Option<TrackingRecord>, HeraldError> {
        Ok(self.inner.read().records.get(tracking_id).cloned())
    }

    async fn has_event_hash(&self, hash: &str) -> Result<bool, HeraldError> {
        Ok(self.inner.read().seen_hashes.contains(hash))
    }

    async fn append_event(&self, event: TrackingEvent) -> Result<(), HeraldError> {
        let mut inner = self.inner.write();
        if let Some(ref hash) = event.dedup_hash {
            inner.seen_hashes.insert(hash.clone());
        }
        inner.events.push(event);
        Ok(())
    }

    async fn events_for(&self, tracking_id: &str) -> Result<Vec<TrackingEvent>, HeraldError> {
        let inner = self.inner.read();
        Ok(inner
            .events
            .iter()
            .rev()
            .filter(|e| e.tracking_id == tracking_id)
            .cloned()
            .collect())
    }

    async fn apply_metrics(
        &self,
        tracking_id: &str,
        event_type: EventType,
        unique: bool,
        at: DateTime<Utc>,
    ) -> Result<(), HeraldError> {
        let mut inner = self.inner.write();
        if let Some(record) = inner.records.get_mut(tracking_id) {
            record.metrics.apply(event_type, unique, at);
        }
        Ok(())
    }

    async fn query(
        &self,
        filter: &AnalyticsFilter,
    ) -> Result<Vec<TrackingRecord>, HeraldError> {
        let inner = self.inner.read();
        Ok(inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.records.get(id))
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<(u64, u64), HeraldError> {
        let mut inner = self.inner.write();

        let stale: Vec<String> = inner
            .records
            .values()
            .filter(|r| r.created_at < cutoff)
            .map(|r| r.tracking_id.clone())
            .collect();
        for id in &stale {
            inner.records.remove(id);
        }
        inner.order.retain(|id| !stale.contains(id));

        let before = inner.events.len();
        inner.events.retain(|e| e.timestamp >= cutoff);
        let deleted_events = (before - inner.events.len()) as u64;

        Ok((stale.len() as u64, deleted_events))
    }
}

#[async_trait]
impl TrackingStore for Arc<MemoryTrackingStore> {
    async fn insert_record(&self, record: TrackingRecord) -> Result<(), HeraldError> {
        (**self).insert_record(record).await
    }
    async fn get_record(
        &self,
        tracking_id: &str,
    ) -> Result<Option<TrackingRecord>, HeraldError> {
        (**self).get_record(tracking_id).await
    }
    async fn has_event_hash(&self, hash: &str) -> Result<bool, HeraldError> {
        (**self).has_event_hash(hash).await
    }
    async fn append_event(&self, event: TrackingEvent) -> Result<(), HeraldError> {
        (**self).append_event(event).await
    }
    async fn events_for(&self, tracking_id: &str) -> Result<Vec<TrackingEvent>, HeraldError> {
        (**self).events_for(tracking_id).await
    }
    async fn apply_metrics(
        &self,
        tracking_id: &str,
        event_type: EventType,
        unique: bool,
        at: DateTime<Utc>,
    ) -> Result<(), HeraldError> {
        (**self).apply_metrics(tracking_id, event_type, unique, at).await
    }
    async fn query(
        &self,
        filter: &AnalyticsFilter,
    ) -> Result<Vec<TrackingRecord>, HeraldError> {
        (**self).query(filter).await
    }
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<(u64, u64), HeraldError> {
        (**self).purge_older_than(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_enforces_unique_tracking_id() {
        let store = MemoryTrackingStore::new();
        let record = TrackingRecord::new("et_1", "adv-1", "a@example.com", Default::default());
        store.insert_record(record.clone()).await.unwrap();

        let err = store.insert_record(record).await.unwrap_err();
        assert!(matches!(err, HeraldError::Conflict(_)));
    }

    #[tokio::test]
    async fn purge_removes_only_stale_data() {
        let store = MemoryTrackingStore::new();
        let mut old = TrackingRecord::new("et_old", "adv-1", "a@example.com", Default::default());
        old.created_at = Utc::now() - chrono::Duration::days(120);
        store.insert_record(old).await.unwrap();
        store
            .insert_record(TrackingRecord::new(
                "et_new",
                "adv-1",
                "a@example.com",
                Default::default(),
            ))
            .await
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(90);
        let (records, events) = store.purge_older_than(cutoff).await.unwrap();
        assert_eq!(records, 1);
        assert_eq!(events, 0);
        assert!(store.get_record("et_old").await.unwrap().is_none());
        assert!(store.get_record("et_new").await.unwrap().is_some());

        // Idempotent: a second sweep deletes nothing further.
        assert_eq!(store.purge_older_than(cutoff).await.unwrap(), (0, 0));
    }
}
