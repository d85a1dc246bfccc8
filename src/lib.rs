//! # Herald
//!
//! Schedule, deliver, and track security advisory emails in Rust.
//!
//! Herald turns a "send this advisory at time T" intent into a guaranteed,
//! at-most-once delivery attempt with bounded retries and an auditable
//! failure trail, renders heterogeneous advisory records into HTML that
//! never breaks on missing data, and measures recipient engagement (opens,
//! clicks) through beacon and link endpoints.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use herald::{
//!     Address, DeliveryRequest, MemoryAdvisoryStore, MemoryDeliveryStore,
//!     MemoryJobStore, MemoryTrackingStore, Scheduler, TrackingService,
//! };
//! use herald::providers::SmtpMailer;
//!
//! let tracking = Arc::new(TrackingService::new(MemoryTrackingStore::shared()));
//! let scheduler = Scheduler::new(
//!     MemoryDeliveryStore::shared(),
//!     MemoryJobStore::shared(),
//!     MemoryAdvisoryStore::shared(),
//!     Arc::new(SmtpMailer::from_env()?),
//!     Arc::clone(&tracking),
//!     Address::with_name("Security Team", "alerts@example.com"),
//! );
//!
//! // Background loops: poll for due jobs, sweep abandoned records.
//! let handle = scheduler.start();
//!
//! // Schedule a delivery.
//! scheduler.schedule(
//!     DeliveryRequest::new("adv-2024-117", Utc::now() + Duration::hours(2))
//!         .to("soc@example.com")
//!         .subject("THREAT ADVISORY: OpenSSL heap overflow")
//!         .operator_message("Patch before Friday.")
//!         .created_by("operator-7"),
//! ).await?;
//!
//! // Expose tracking + management endpoints.
//! let app = axum::Router::new().nest("/api", herald::http::router(
//!     Arc::clone(&scheduler),
//!     tracking,
//! ));
//!
//! // Later:
//! handle.shutdown().await;
//! ```
//!
//! ## Components
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`Scheduler`] | Poll loop, worker pool, claims, retries, abandoned-record sweep |
//! | [`template`] | Advisory HTML rendering with deterministic fallbacks |
//! | [`tracking`] | Identifier issuance, event ingestion, dedup, aggregates |
//! | [`DeliveryStore`] / [`JobStore`] | Delivery record + job persistence (CAS transitions) |
//! | [`http`] | Beacon/link endpoints, analytics, schedule management |
//! | [`providers`] | `Mailer` implementations (SMTP, local, logger) |
//!
//! The durable substrate is abstract: implement [`DeliveryStore`],
//! [`JobStore`], and [`TrackingStore`] over any store with atomic
//! compare-and-swap updates. In-memory implementations back tests and
//! development.
//!
//! ## Feature Flags
//!
//! - `smtp` (default) - SMTP delivery via lettre

/// The version of the herald crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod address;
mod advisory;
mod email;
mod error;
mod mailer;
mod record;
mod scheduler;
mod store;

pub mod http;
pub mod providers;
pub mod template;
pub mod testing;
pub mod tracking;

use std::env;

// Re-exports
pub use address::{dedup_addresses, Address, ToAddress};
pub use advisory::{
    AdvisoryLookup, AdvisoryView, Indicator, IndicatorKind, MemoryAdvisoryStore, MitreTactic,
};
pub use email::Email;
pub use error::HeraldError;
pub use mailer::{DeliveryResult, Mailer, MailerExt};
pub use record::{DeliveryRecord, DeliveryRequest, DeliveryState, DeliveryUpdate};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};
pub use store::{
    DeliveryFilter, DeliveryStore, FailureOutcome, Job, JobStore, MemoryDeliveryStore,
    MemoryJobStore,
};
pub use tracking::{
    AnalyticsAggregate, AnalyticsFilter, AnalyticsPage, EventInput, MemoryTrackingStore,
    TrackingConfig, TrackingHandles, TrackingOptions, TrackingService, TrackingStore,
};

/// Get the default from address from environment.
///
/// Reads `EMAIL_FROM` and optionally `EMAIL_FROM_NAME`.
pub fn default_from() -> Option<Address> {
    let email = env::var("EMAIL_FROM").ok()?;
    match env::var("EMAIL_FROM_NAME").ok() {
        Some(name) => Some(Address::with_name(name, email)),
        None => Some(Address::new(email)),
    }
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::Address;
    pub use crate::AdvisoryView;
    pub use crate::DeliveryRecord;
    pub use crate::DeliveryRequest;
    pub use crate::DeliveryState;
    pub use crate::Email;
    pub use crate::HeraldError;
    pub use crate::Mailer;
    pub use crate::Scheduler;
    pub use crate::ToAddress;
    pub use crate::TrackingService;
    pub use crate::{default_from, VERSION};
}
