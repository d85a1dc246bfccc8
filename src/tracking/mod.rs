//! Engagement tracking: identifier issuance, event ingestion, deduplication,
//! and rolling aggregate metrics.
//!
//! One [`TrackingRecord`] is minted per delivered email. The rendered
//! message embeds a beacon image and rewritten links pointing back at the
//! tracking endpoints; inbound hits become [`TrackingEvent`]s. Near-duplicate
//! events (same identifier, type, client, and hour) stay in the audit log
//! but are excluded from the unique counters.

mod device;
mod model;
mod store;

pub use device::parse_user_agent;
pub use model::{
    AnalyticsAggregate, AnalyticsFilter, AnalyticsPage, DeviceInfo, DeviceKind, EventType,
    PurgeOutcome, TrackingEvent, TrackingMetrics, TrackingOptions, TrackingRecord,
};
pub use store::{MemoryTrackingStore, TrackingStore};

use chrono::{Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::HeraldError;

/// Tracking service configuration.
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    /// Base URL prefixed to beacon and link endpoints. Empty means relative
    /// URLs, which work behind any domain.
    pub base_url: String,
    /// Default retention window for [`TrackingService::purge_expired`].
    pub retention_days: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            retention_days: 90,
        }
    }
}

/// Handles issued alongside a tracking identifier: where the beacon points
/// and how outbound links are rewritten. Both respect the identifier's
/// tracking options.
#[derive(Debug, Clone)]
pub struct TrackingHandles {
    pub tracking_id: String,
    base_url: String,
    options: TrackingOptions,
}

impl TrackingHandles {
    /// Beacon image URL, or `None` when open tracking is disabled.
    pub fn beacon_url(&self) -> Option<String> {
        if !self.options.track_opens {
            return None;
        }
        Some(format!(
            "{}/track/pixel?t={}",
            self.base_url, self.tracking_id
        ))
    }

    /// Rewrite an outbound link through the click endpoint. Returns the
    /// original URL unchanged when click tracking is disabled.
    pub fn rewrite_link(&self, url: &str, link_id: Option<&str>) -> String {
        if !self.options.track_clicks {
            return url.to_string();
        }
        let mut rewritten = format!(
            "{}/track/link?t={}&u={}",
            self.base_url,
            self.tracking_id,
            urlencoding::encode(url)
        );
        if let Some(link_id) = link_id {
            rewritten.push_str("&l=");
            rewritten.push_str(&urlencoding::encode(link_id));
        }
        rewritten
    }
}

/// An inbound engagement event, before ingestion.
#[derive(Debug, Clone)]
pub struct EventInput {
    pub tracking_id: String,
    pub event_type: EventType,
    pub ip_address: String,
    pub user_agent: String,
    pub referer: Option<String>,
    pub link_url: Option<String>,
    pub link_id: Option<String>,
}

impl EventInput {
    /// A beacon (open) hit.
    pub fn open(
        tracking_id: impl Into<String>,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            tracking_id: tracking_id.into(),
            event_type: EventType::Open,
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            referer: None,
            link_url: None,
            link_id: None,
        }
    }

    /// A link (click) hit with its original destination.
    pub fn click(
        tracking_id: impl Into<String>,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
        link_url: impl Into<String>,
    ) -> Self {
        Self {
            tracking_id: tracking_id.into(),
            event_type: EventType::Click,
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            referer: None,
            link_url: Some(link_url.into()),
            link_id: None,
        }
    }

    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn link_id(mut self, link_id: impl Into<String>) -> Self {
        self.link_id = Some(link_id.into());
        self
    }
}

/// The engagement tracking service.
pub struct TrackingService {
    store: Arc<dyn TrackingStore>,
    config: TrackingConfig,
    rng: SystemRandom,
}

impl TrackingService {
    pub fn new(store: Arc<dyn TrackingStore>) -> Self {
        Self::with_config(store, TrackingConfig::default())
    }

    pub fn with_config(store: Arc<dyn TrackingStore>, config: TrackingConfig) -> Self {
        Self {
            store,
            config,
            rng: SystemRandom::new(),
        }
    }

    /// Mint a tracking identifier for one (email, recipient) pair.
    ///
    /// The identifier combines a strong random component with a hash over
    /// content and timestamp, formatted URL-safe. Uniqueness is enforced by
    /// the store's unique insert; the negligible collision is retried.
    pub async fn issue(
        &self,
        email_id: &str,
        recipient_email: &str,
        options: TrackingOptions,
    ) -> Result<TrackingHandles, HeraldError> {
        for _ in 0..3 {
            let tracking_id = self.generate_tracking_id(email_id, recipient_email)?;
            let record =
                TrackingRecord::new(tracking_id.clone(), email_id, recipient_email, options);
            match self.store.insert_record(record).await {
                Ok(()) => {
                    tracing::debug!(tracking_id = %tracking_id, email_id, "Issued tracking identifier");
                    return Ok(TrackingHandles {
                        tracking_id,
                        base_url: self.config.base_url.clone(),
                        options,
                    });
                }
                Err(HeraldError::Conflict(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(HeraldError::Conflict(
            "could not allocate a unique tracking id".into(),
        ))
    }

    /// Handles for an already-issued identifier. Used by later delivery
    /// attempts of the same record, which must reuse its tracking id.
    pub fn handles(&self, tracking_id: &str, options: TrackingOptions) -> TrackingHandles {
        TrackingHandles {
            tracking_id: tracking_id.to_string(),
            base_url: self.config.base_url.clone(),
            options,
        }
    }

    /// Ingest a beacon or link hit.
    ///
    /// Returns `Ok(false)` for an unknown tracking id - never an error, so
    /// the HTTP boundary can stay success-shaped toward mail clients.
    /// Duplicates within the hour bucket are appended to the log for audit
    /// completeness but excluded from the unique counters.
    pub async fn record_event(&self, input: EventInput) -> Result<bool, HeraldError> {
        let Some(record) = self.store.get_record(&input.tracking_id).await? else {
            tracing::debug!(tracking_id = %input.tracking_id, "Ignoring event for unknown tracking id");
            return Ok(false);
        };

        let now = Utc::now();
        // Hour-aligned bucket: the same client re-fetching within the hour
        // counts once in the unique counters.
        let bucket = now.format("%Y-%m-%dT%H").to_string();
        let hash = hex::encode(Sha256::digest(
            format!(
                "{}:{}:{}:{}:{}",
                input.tracking_id, input.event_type, input.ip_address, input.user_agent, bucket
            )
            .as_bytes(),
        ));
        let unique = !self.store.has_event_hash(&hash).await?;

        let device = if record.options.track_device {
            device::parse_user_agent(&input.user_agent)
        } else {
            DeviceInfo::default()
        };

        let event = TrackingEvent {
            tracking_id: input.tracking_id.clone(),
            event_type: input.event_type,
            timestamp: now,
            ip_address: input.ip_address,
            user_agent: input.user_agent,
            referer: input.referer,
            link_url: input.link_url,
            link_id: input.link_id,
            device,
            dedup_hash: if unique { Some(hash) } else { None },
        };

        self.store.append_event(event).await?;
        self.store
            .apply_metrics(&input.tracking_id, input.event_type, unique, now)
            .await?;

        tracing::debug!(
            tracking_id = %input.tracking_id,
            event_type = %input.event_type,
            unique,
            "Recorded tracking event"
        );
        Ok(true)
    }

    /// Aggregate metrics over every record matching the filter.
    pub async fn metrics(
        &self,
        filter: &AnalyticsFilter,
    ) -> Result<AnalyticsAggregate, HeraldError> {
        let records = self.store.query(filter).await?;
        Ok(aggregate(&records))
    }

    /// Paginated records plus the aggregate over the full matching set.
    pub async fn analytics(&self, filter: AnalyticsFilter) -> Result<AnalyticsPage, HeraldError> {
        let matching = self.store.query(&filter).await?;
        let aggregate = aggregate(&matching);
        let total = matching.len();

        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(100);
        let records = matching.into_iter().skip(offset).take(limit).collect();

        Ok(AnalyticsPage {
            records,
            total,
            aggregate,
        })
    }

    /// Event log for one identifier, newest first.
    pub async fn events(&self, tracking_id: &str) -> Result<Vec<TrackingEvent>, HeraldError> {
        self.store.events_for(tracking_id).await
    }

    /// Delete tracking data older than the retention window. Idempotent.
    pub async fn purge_expired(&self, retention_days: u32) -> Result<PurgeOutcome, HeraldError> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let (deleted_records, deleted_events) = self.store.purge_older_than(cutoff).await?;
        if deleted_records > 0 || deleted_events > 0 {
            tracing::info!(deleted_records, deleted_events, "Purged expired tracking data");
        }
        Ok(PurgeOutcome {
            deleted_records,
            deleted_events,
        })
    }

    /// Retention window from configuration.
    pub fn retention_days(&self) -> u32 {
        self.config.retention_days
    }

    fn generate_tracking_id(
        &self,
        email_id: &str,
        recipient_email: &str,
    ) -> Result<String, HeraldError> {
        let mut random = [0u8; 8];
        self.rng.fill(&mut random).map_err(|_| {
            HeraldError::Configuration("system random source unavailable".into())
        })?;

        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let digest = Sha256::digest(
            format!(
                "{}:{}:{}:{}",
                email_id,
                recipient_email,
                millis,
                hex::encode(random)
            )
            .as_bytes(),
        );

        Ok(format!(
            "et_{}_{}",
            &hex::encode(digest)[..16],
            to_base36(millis)
        ))
    }
}

/// Compute the aggregate block over a set of records.
fn aggregate(records: &[TrackingRecord]) -> AnalyticsAggregate {
    let total_emails = records.len() as u64;
    let total_opens: u64 = records.iter().map(|r| r.metrics.open_count).sum();
    let total_clicks: u64 = records.iter().map(|r| r.metrics.click_count).sum();
    let unique_opens: u64 = records.iter().map(|r| r.metrics.unique_opens).sum();
    let unique_clicks: u64 = records.iter().map(|r| r.metrics.unique_clicks).sum();
    let emails_opened = records.iter().filter(|r| r.metrics.open_count > 0).count() as u64;
    let emails_clicked = records.iter().filter(|r| r.metrics.click_count > 0).count() as u64;

    AnalyticsAggregate {
        total_emails,
        total_opens,
        total_clicks,
        unique_opens,
        unique_clicks,
        emails_opened,
        emails_clicked,
        open_rate: percentage(emails_opened, total_emails),
        click_rate: percentage(emails_clicked, total_emails),
        click_through_rate: percentage(total_clicks, total_opens),
    }
}

/// `part / whole` as a percentage with two-decimal rounding; 0 for an empty
/// denominator (never divide by zero).
fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let rate = part as f64 / whole as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

/// Lowercase base-36 rendering of a millisecond timestamp.
fn to_base36(mut value: u64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    digits.iter().rev().collect()
}
