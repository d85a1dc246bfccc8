//! Tracking records, events, and aggregate metric types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of engagement event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Open,
    Click,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Click => "click",
        })
    }
}

/// Per-identifier tracking configuration.
///
/// Options gate what gets embedded in the rendered email (beacon, rewritten
/// links) and whether device details are retained; they do not reject events
/// that arrive anyway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrackingOptions {
    pub track_opens: bool,
    pub track_clicks: bool,
    pub track_device: bool,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            track_opens: true,
            track_clicks: true,
            track_device: true,
        }
    }
}

/// Coarse device class parsed from the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Desktop,
    Mobile,
    Tablet,
}

/// Device details parsed from the user agent string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub kind: DeviceKind,
    pub os: String,
    pub browser: String,
    pub version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            kind: DeviceKind::Desktop,
            os: "unknown".to_string(),
            browser: "unknown".to_string(),
            version: "unknown".to_string(),
        }
    }
}

/// One ingested beacon or link hit. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub tracking_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
    #[serde(default)]
    pub referer: Option<String>,
    /// Original destination URL (click events only).
    #[serde(default)]
    pub link_url: Option<String>,
    /// Internal link identifier (click events only).
    #[serde(default)]
    pub link_id: Option<String>,
    pub device: DeviceInfo,
    /// Set only on the first event of a dedup group; duplicates keep `None`,
    /// mirroring a sparse unique index. `Some` therefore means "counted as
    /// unique".
    #[serde(default)]
    pub dedup_hash: Option<String>,
}

impl TrackingEvent {
    pub fn is_unique(&self) -> bool {
        self.dedup_hash.is_some()
    }
}

/// Rolling aggregate counters for one tracking identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingMetrics {
    pub open_count: u64,
    pub click_count: u64,
    pub unique_opens: u64,
    pub unique_clicks: u64,
    pub first_open_at: Option<DateTime<Utc>>,
    pub last_open_at: Option<DateTime<Utc>>,
    pub first_click_at: Option<DateTime<Utc>>,
    pub last_click_at: Option<DateTime<Utc>>,
}

impl TrackingMetrics {
    /// Fold one event into the counters.
    pub(crate) fn apply(&mut self, event_type: EventType, unique: bool, at: DateTime<Utc>) {
        match event_type {
            EventType::Open => {
                self.open_count += 1;
                if unique {
                    self.unique_opens += 1;
                }
                self.first_open_at.get_or_insert(at);
                self.last_open_at = Some(at);
            }
            EventType::Click => {
                self.click_count += 1;
                if unique {
                    self.unique_clicks += 1;
                }
                self.first_click_at.get_or_insert(at);
                self.last_click_at = Some(at);
            }
        }
    }
}

/// Tracking state for one delivered email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingRecord {
    /// Opaque, unguessable, globally unique identifier.
    pub tracking_id: String,
    /// The advisory/content identifier being tracked.
    pub email_id: String,
    pub recipient_email: String,
    pub options: TrackingOptions,
    pub metrics: TrackingMetrics,
    pub created_at: DateTime<Utc>,
}

impl TrackingRecord {
    pub fn new(
        tracking_id: impl Into<String>,
        email_id: impl Into<String>,
        recipient_email: impl Into<String>,
        options: TrackingOptions,
    ) -> Self {
        Self {
            tracking_id: tracking_id.into(),
            email_id: email_id.into(),
            recipient_email: recipient_email.into(),
            options,
            metrics: TrackingMetrics::default(),
            created_at: Utc::now(),
        }
    }
}

/// Filter for analytics queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsFilter {
    pub tracking_id: Option<String>,
    pub email_id: Option<String>,
    pub recipient_email: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl AnalyticsFilter {
    pub(crate) fn matches(&self, record: &TrackingRecord) -> bool {
        if let Some(ref id) = self.tracking_id {
            if &record.tracking_id != id {
                return false;
            }
        }
        if let Some(ref email_id) = self.email_id {
            if &record.email_id != email_id {
                return false;
            }
        }
        if let Some(ref recipient) = self.recipient_email {
            if &record.recipient_email != recipient {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if record.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if record.created_at > to {
                return false;
            }
        }
        true
    }
}

/// Aggregate engagement statistics over a set of tracking records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsAggregate {
    pub total_emails: u64,
    pub total_opens: u64,
    pub total_clicks: u64,
    pub unique_opens: u64,
    pub unique_clicks: u64,
    /// Records with at least one open.
    pub emails_opened: u64,
    /// Records with at least one click.
    pub emails_clicked: u64,
    /// Percentage of emails opened, two-decimal rounded.
    pub open_rate: f64,
    /// Percentage of emails clicked, two-decimal rounded.
    pub click_rate: f64,
    /// Clicks per open as a percentage (0 when there are no opens).
    pub click_through_rate: f64,
}

/// One page of analytics results plus the aggregate over the full match set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsPage {
    pub records: Vec<TrackingRecord>,
    /// Total number of matching records, independent of pagination.
    pub total: usize,
    pub aggregate: AnalyticsAggregate,
}

/// Result of a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeOutcome {
    pub deleted_records: u64,
    pub deleted_events: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_apply_counts_unique_and_total_separately() {
        let mut metrics = TrackingMetrics::default();
        let t0 = Utc::now();
        metrics.apply(EventType::Open, true, t0);
        metrics.apply(EventType::Open, false, t0);

        assert_eq!(metrics.open_count, 2);
        assert_eq!(metrics.unique_opens, 1);
        assert_eq!(metrics.first_open_at, Some(t0));
        assert_eq!(metrics.click_count, 0);
    }

    #[test]
    fn metrics_first_timestamp_sticks() {
        let mut metrics = TrackingMetrics::default();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::minutes(5);
        metrics.apply(EventType::Click, true, t0);
        metrics.apply(EventType::Click, true, t1);

        assert_eq!(metrics.first_click_at, Some(t0));
        assert_eq!(metrics.last_click_at, Some(t1));
    }

    #[test]
    fn filter_matches_on_all_dimensions() {
        let record = TrackingRecord::new("et_1", "adv-1", "a@example.com", Default::default());

        assert!(AnalyticsFilter::default().matches(&record));
        assert!(AnalyticsFilter {
            email_id: Some("adv-1".into()),
            ..Default::default()
        }
        .matches(&record));
        assert!(!AnalyticsFilter {
            recipient_email: Some("b@example.com".into()),
            ..Default::default()
        }
        .matches(&record));
        assert!(!AnalyticsFilter {
            date_to: Some(record.created_at - chrono::Duration::seconds(1)),
            ..Default::default()
        }
        .matches(&record));
    }
}
