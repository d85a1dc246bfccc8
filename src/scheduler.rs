//! Job scheduler and worker pool for scheduled advisory deliveries.
//!
//! The scheduler owns timing, dispatch, retry, and concurrency control over
//! delivery records. It is an explicit instance with injected dependencies
//! (stores, advisory lookup, mailer, tracking service) and an in-process
//! start/stop lifecycle - no process-global state.
//!
//! One delivery attempt runs the pipeline:
//! claim -> resolve advisory -> mint tracking handles -> render -> re-check
//! state -> timed send -> conditional state transition. Every failure lands
//! on the record itself; nothing escapes a worker task.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::Instrument;

use crate::address::Address;
use crate::advisory::AdvisoryLookup;
use crate::email::Email;
use crate::error::HeraldError;
use crate::mailer::Mailer;
use crate::record::{DeliveryRecord, DeliveryRequest, DeliveryState, DeliveryUpdate};
use crate::store::{DeliveryFilter, DeliveryStore, FailureOutcome, JobStore};
use crate::template;
use crate::tracking::{TrackingHandles, TrackingOptions, TrackingService};

/// Configuration for the scheduler service.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between due-job polls (default: 30 seconds).
    pub poll_interval: Duration,
    /// Interval between maintenance sweeps (default: 5 minutes).
    pub sweep_interval: Duration,
    /// Maximum concurrent in-flight sends (default: 5).
    pub max_concurrent_sends: usize,
    /// Failed attempts before a record is Failed (default: 3).
    pub max_retries: u32,
    /// Base retry delay; doubles with each attempt (default: 60 seconds).
    pub retry_backoff: Duration,
    /// Per-attempt mailer timeout; expiry counts as a transient failure
    /// (default: 30 seconds).
    pub send_timeout: Duration,
    /// Pending records this far past their scheduled time with no claim in
    /// progress are forcibly failed by the sweep (default: 1 hour).
    pub abandoned_grace: Duration,
    /// Tracking options applied to every minted identifier.
    pub tracking: TrackingOptions,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(300),
            max_concurrent_sends: 5,
            max_retries: 3,
            retry_backoff: Duration::from_secs(60),
            send_timeout: Duration::from_secs(30),
            abandoned_grace: Duration::from_secs(3600),
            tracking: TrackingOptions::default(),
        }
    }
}

/// Handle to a started scheduler. Dropping it signals both loops to stop
/// without waiting; [`SchedulerHandle::shutdown`] stops them and waits.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    poll_task: JoinHandle<()>,
    sweep_task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal both loops to stop and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.poll_task.await;
        let _ = self.sweep_task.await;
    }
}

/// The scheduled-delivery engine.
pub struct Scheduler {
    config: SchedulerConfig,
    records: Arc<dyn DeliveryStore>,
    jobs: Arc<dyn JobStore>,
    advisories: Arc<dyn AdvisoryLookup>,
    mailer: Arc<dyn Mailer>,
    tracking: Arc<TrackingService>,
    from: Address,
    send_slots: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        records: Arc<dyn DeliveryStore>,
        jobs: Arc<dyn JobStore>,
        advisories: Arc<dyn AdvisoryLookup>,
        mailer: Arc<dyn Mailer>,
        tracking: Arc<TrackingService>,
        from: Address,
    ) -> Arc<Self> {
        Self::with_config(
            SchedulerConfig::default(),
            records,
            jobs,
            advisories,
            mailer,
            tracking,
            from,
        )
    }

    pub fn with_config(
        config: SchedulerConfig,
        records: Arc<dyn DeliveryStore>,
        jobs: Arc<dyn JobStore>,
        advisories: Arc<dyn AdvisoryLookup>,
        mailer: Arc<dyn Mailer>,
        tracking: Arc<TrackingService>,
        from: Address,
    ) -> Arc<Self> {
        let send_slots = Arc::new(Semaphore::new(config.max_concurrent_sends.max(1)));
        Arc::new(Self {
            config,
            records,
            jobs,
            advisories,
            mailer,
            tracking,
            from,
            send_slots,
        })
    }

    /// The record store, for read-side consumers (management API).
    pub fn records(&self) -> Arc<dyn DeliveryStore> {
        Arc::clone(&self.records)
    }

    // ========================================================================
    // Management operations
    // ========================================================================

    /// Validate and persist a delivery, and bind its job.
    pub async fn schedule(
        &self,
        request: DeliveryRequest,
    ) -> Result<DeliveryRecord, HeraldError> {
        let record = self.records.create(request).await?;
        self.jobs.enqueue(&record.id, record.scheduled_at).await?;
        tracing::info!(
            record_id = %record.id,
            advisory = %record.advisory_ref,
            scheduled_at = %record.scheduled_at.to_rfc3339(),
            "Scheduled delivery"
        );
        Ok(record)
    }

    /// Update a Pending delivery; a changed schedule re-binds the job.
    pub async fn update(
        &self,
        id: &str,
        update: DeliveryUpdate,
    ) -> Result<DeliveryRecord, HeraldError> {
        let reschedule = update.scheduled_at;
        let record = self.records.update(id, update).await?;
        if let Some(run_at) = reschedule {
            self.jobs.enqueue(id, run_at).await?;
        }
        Ok(record)
    }

    /// Cancel a Pending delivery and disable its job. A worker that already
    /// claimed the job re-checks state before sending and will abort.
    pub async fn cancel(&self, id: &str) -> Result<DeliveryRecord, HeraldError> {
        let record = self.records.cancel(id).await?;
        self.jobs.disable(id).await?;
        tracing::info!(record_id = %id, "Cancelled delivery");
        Ok(record)
    }

    /// Delete a delivery record (store enforces the state precondition) and
    /// its job.
    pub async fn delete(&self, id: &str, elevated: bool) -> Result<bool, HeraldError> {
        let deleted = self.records.delete(id, elevated).await?;
        if deleted {
            self.jobs.remove(id).await?;
        }
        Ok(deleted)
    }

    pub async fn get(&self, id: &str) -> Result<Option<DeliveryRecord>, HeraldError> {
        self.records.get(id).await
    }

    pub async fn list(
        &self,
        filter: DeliveryFilter,
    ) -> Result<Vec<DeliveryRecord>, HeraldError> {
        self.records.list(filter).await
    }

    /// Advance a Pending delivery's job for immediate dispatch.
    pub async fn dispatch_now(&self, id: &str) -> Result<(), HeraldError> {
        let record = self
            .records
            .get(id)
            .await?
            .ok_or_else(|| HeraldError::not_found("delivery record", id))?;
        if record.state != DeliveryState::Pending {
            return Err(HeraldError::Conflict(format!(
                "record {} is {} and cannot be dispatched",
                id, record.state
            )));
        }
        self.jobs.enqueue(id, Utc::now()).await
    }

    // ========================================================================
    // Worker pool
    // ========================================================================

    /// Run one poll pass: claim and process every due job, bounded by the
    /// concurrency cap. Returns the number of jobs this pass claimed.
    pub async fn process_due(self: &Arc<Self>) -> Result<usize, HeraldError> {
        let now = Utc::now();
        let batch = self.config.max_concurrent_sends.max(1) * 4;
        let due = self.jobs.due(now, batch).await?;
        if due.is_empty() {
            return Ok(0);
        }
        tracing::debug!(count = due.len(), "Dispatching due jobs");

        let mut workers = Vec::with_capacity(due.len());
        for job in due {
            let scheduler = Arc::clone(self);
            let permit = Arc::clone(&self.send_slots)
                .acquire_owned()
                .await
                .map_err(|_| HeraldError::Storage("send slots closed".into()))?;
            workers.push(tokio::spawn(async move {
                let _permit = permit;
                scheduler.process_job(&job.record_id).await
            }));
        }

        let mut claimed = 0;
        for worker in workers {
            match worker.await {
                Ok(true) => claimed += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::error!(error = %error, "Delivery worker panicked");
                }
            }
        }
        Ok(claimed)
    }

    /// Claim and process one job. Returns whether the claim was won. Never
    /// propagates a processing error - failures are recorded on the
    /// delivery record, and anything else is logged.
    pub async fn process_job(&self, record_id: &str) -> bool {
        match self.jobs.claim(record_id, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(error) => {
                tracing::warn!(record_id, error = %error, "Job claim failed");
                return false;
            }
        }

        if let Err(error) = self.run_claimed(record_id).await {
            // Failures on the delivery path are captured on the record; an
            // error escaping to here means the store itself misbehaved.
            tracing::error!(record_id, error = %error, "Delivery attempt aborted by storage failure");
        }
        true
    }

    /// The delivery pipeline for a claimed job.
    async fn run_claimed(&self, record_id: &str) -> Result<(), HeraldError> {
        let Some(record) = self.records.get(record_id).await? else {
            self.jobs.disable(record_id).await?;
            return Ok(());
        };

        // Idempotent guard: the substrate may re-trigger claims for settled
        // records (worker crash, re-poll). Those must be no-ops.
        if record.state != DeliveryState::Pending {
            self.jobs.disable(record_id).await?;
            return Ok(());
        }

        let span = tracing::info_span!(
            "herald.deliver_scheduled",
            record_id = %record.id,
            advisory = %record.advisory_ref,
            attempt = record.retry_count + 1,
            provider = self.mailer.provider_name(),
        );
        self.attempt_delivery(record).instrument(span).await
    }

    /// One delivery attempt for a claimed, still-Pending record.
    async fn attempt_delivery(&self, record: DeliveryRecord) -> Result<(), HeraldError> {
        // A missing advisory is non-retryable: fail on the first attempt,
        // retry counter untouched.
        let advisory = match self.advisories.get(&record.advisory_ref).await? {
            Some(advisory) => advisory,
            None => {
                let error = HeraldError::not_found("advisory", record.advisory_ref.clone());
                tracing::warn!(error = %error, "Failing delivery: advisory cannot be resolved");
                self.records.mark_failed(&record.id, &error.to_string()).await?;
                self.jobs.disable(&record.id).await?;
                return Ok(());
            }
        };

        let tracking = self.tracking_handles_for(&record).await;

        let html = template::render_or_fallback(
            &advisory,
            record.operator_message.as_deref(),
            tracking.as_ref(),
        );

        let subject = if record.subject.trim().is_empty() {
            let title = template::first_present(
                &[&advisory.title, &advisory.display_title],
                "Advisory",
            );
            format!("THREAT ADVISORY: {}", title)
        } else {
            record.subject.clone()
        };

        let email = Email::new()
            .from(self.from.clone())
            .put_to(record.to.clone())
            .put_cc(record.cc.clone())
            .put_bcc(record.bcc.clone())
            .subject(subject)
            .html_body(html);

        // Cancellation barrier: a cancel that landed after the claim must
        // suppress the send. Re-check immediately before the mailer call.
        match self.records.get(&record.id).await? {
            Some(current) if current.state == DeliveryState::Pending => {}
            _ => {
                tracing::info!("Record no longer pending; aborting send");
                self.jobs.disable(&record.id).await?;
                return Ok(());
            }
        }

        let outcome = match tokio::time::timeout(
            self.config.send_timeout,
            self.mailer.deliver(&email),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(HeraldError::Timeout(self.config.send_timeout.as_secs())),
        };

        match outcome {
            Ok(result) => {
                // CAS Pending -> Sent. Loses only to a cancellation that
                // landed during the send; the result is then discarded.
                if self.records.mark_sent(&record.id, Utc::now()).await? {
                    tracing::info!(message_id = %result.message_id, "Delivery sent");
                    self.jobs.remove(&record.id).await?;
                } else {
                    tracing::info!(
                        message_id = %result.message_id,
                        "Send completed but record settled concurrently; result discarded"
                    );
                    self.jobs.disable(&record.id).await?;
                }
            }
            Err(error) if error.is_retryable() => {
                match self
                    .records
                    .record_failure(&record.id, &error.to_string(), self.config.max_retries)
                    .await?
                {
                    FailureOutcome::Retrying { retry_count } => {
                        let next_run = Utc::now() + backoff_delay(self.config.retry_backoff, retry_count);
                        self.jobs
                            .release_for_retry(&record.id, next_run, &error.to_string())
                            .await?;
                        tracing::warn!(
                            error = %error,
                            retry_count,
                            next_run = %next_run.to_rfc3339(),
                            "Transient delivery failure; retry scheduled"
                        );
                    }
                    FailureOutcome::Exhausted => {
                        tracing::error!(error = %error, "Delivery failed; retries exhausted");
                        self.jobs.disable(&record.id).await?;
                    }
                    FailureOutcome::Stale => {
                        self.jobs.disable(&record.id).await?;
                    }
                }
            }
            Err(error) => {
                tracing::error!(error = %error, "Non-retryable delivery failure");
                self.records.mark_failed(&record.id, &error.to_string()).await?;
                self.jobs.disable(&record.id).await?;
            }
        }

        Ok(())
    }

    /// Mint (or re-derive) the tracking handles for a record. The tracking
    /// id is assigned to the record at most once; later attempts reuse it.
    /// Tracking is best-effort - a failure here never blocks the send.
    async fn tracking_handles_for(&self, record: &DeliveryRecord) -> Option<TrackingHandles> {
        if let Some(ref existing) = record.tracking_id {
            return Some(self.tracking.handles(existing, self.config.tracking));
        }

        let recipient = &record.to.first()?.email;
        match self
            .tracking
            .issue(&record.advisory_ref, recipient, self.config.tracking)
            .await
        {
            Ok(handles) => {
                match self
                    .records
                    .assign_tracking_id(&record.id, &handles.tracking_id)
                    .await
                {
                    Ok(effective) if effective == handles.tracking_id => Some(handles),
                    // Another attempt won the set-once race; use its id.
                    Ok(effective) => Some(self.tracking.handles(&effective, self.config.tracking)),
                    Err(error) => {
                        tracing::warn!(error = %error, "Could not persist tracking id; sending untracked");
                        None
                    }
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "Could not issue tracking id; sending untracked");
                None
            }
        }
    }

    // ========================================================================
    // Maintenance sweep
    // ========================================================================

    /// Force-fail Pending records stuck past the grace period with no claim
    /// in progress. Returns how many records were failed.
    pub async fn sweep_abandoned(&self) -> Result<usize, HeraldError> {
        let grace = ChronoDuration::from_std(self.config.abandoned_grace)
            .unwrap_or_else(|_| ChronoDuration::hours(1));
        let cutoff = Utc::now() - grace;
        let stale = self.records.list_due(cutoff).await?;

        let mut failed = 0;
        for record in stale {
            if let Some(job) = self.jobs.get(&record.id).await? {
                // A fresh claim means a send is in flight right now. A claim
                // older than the grace period is a crashed worker's leftover
                // and does not shield the record.
                if job.claimed_at.is_some_and(|at| at > cutoff) {
                    continue;
                }
            }
            let message = format!(
                "Abandoned: still pending at {} though scheduled for {}",
                Utc::now().to_rfc3339(),
                record.scheduled_at.to_rfc3339()
            );
            if self.records.mark_failed(&record.id, &message).await? {
                self.jobs.disable(&record.id).await?;
                tracing::warn!(record_id = %record.id, "Swept abandoned delivery to Failed");
                failed += 1;
            }
        }
        Ok(failed)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the poll and sweep loops. Call [`SchedulerHandle::shutdown`] to
    /// stop them.
    pub fn start(self: &Arc<Self>) -> SchedulerHandle {
        tracing::info!(
            poll_interval = ?self.config.poll_interval,
            max_concurrent_sends = self.config.max_concurrent_sends,
            "Starting scheduler"
        );
        let (shutdown, poll_rx) = watch::channel(false);
        let sweep_rx = poll_rx.clone();

        let poll_task = tokio::spawn(poll_loop(Arc::clone(self), poll_rx));
        let sweep_task = tokio::spawn(sweep_loop(Arc::clone(self), sweep_rx));

        SchedulerHandle {
            shutdown,
            poll_task,
            sweep_task,
        }
    }
}

async fn poll_loop(scheduler: Arc<Scheduler>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(scheduler.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(error) = scheduler.process_due().await {
                    tracing::error!(error = %error, "Error polling due jobs");
                }
            }
            changed = shutdown.changed() => {
                // A dropped sender also stops the loop.
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Scheduler poll loop stopping");
                    break;
                }
            }
        }
    }
}

async fn sweep_loop(scheduler: Arc<Scheduler>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(scheduler.config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(error) = scheduler.sweep_abandoned().await {
                    tracing::error!(error = %error, "Error sweeping abandoned deliveries");
                }
                let retention = scheduler.tracking.retention_days();
                if let Err(error) = scheduler.tracking.purge_expired(retention).await {
                    tracing::error!(error = %error, "Error purging expired tracking data");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Scheduler sweep loop stopping");
                    break;
                }
            }
        }
    }
}

/// Exponential backoff: base delay doubling with each completed attempt.
fn backoff_delay(base: Duration, retry_count: u32) -> ChronoDuration {
    let factor = 1u32 << retry_count.saturating_sub(1).min(16);
    ChronoDuration::from_std(base.saturating_mul(factor))
        .unwrap_or_else(|_| ChronoDuration::hours(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_secs(60);
        assert_eq!(backoff_delay(base, 1), ChronoDuration::seconds(60));
        assert_eq!(backoff_delay(base, 2), ChronoDuration::seconds(120));
        assert_eq!(backoff_delay(base, 3), ChronoDuration::seconds(240));
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.send_timeout, Duration::from_secs(30));
        assert_eq!(config.abandoned_grace, Duration::from_secs(3600));
    }
}
