//! One-shot reminder dispatch for confirmed bookings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::Engine;
use crate::model::{BookingInfo, BookingStatus, Ms};
use crate::observability;

/// What a fired reminder hands to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderPayload {
    pub booking_id: Ulid,
    pub contact_id: i64,
    pub resource_name: String,
    pub start: Ms,
    pub duration_min: i64,
}

/// Delivery side of the reminder pipeline, implemented by the front-end.
#[async_trait]
pub trait ReminderSink: Send + Sync {
    async fn deliver(&self, payload: ReminderPayload);
}

struct Job {
    job_id: Ulid,
    handle: JoinHandle<()>,
}

/// One-shot reminder jobs keyed by booking id (the stable key).
///
/// Re-scheduling a booking replaces its prior job. `cancel` is idempotent
/// and safe to race with the job's own firing: the job deregisters itself
/// with a compare on its job id before delivering, so neither side can
/// double-fire or crash the other. A job whose booking was cancelled or
/// deleted in the meantime quietly does nothing.
pub struct ReminderScheduler {
    engine: Arc<Engine>,
    sink: Arc<dyn ReminderSink>,
    jobs: Arc<DashMap<Ulid, Job>>,
}

impl ReminderScheduler {
    pub fn new(engine: Arc<Engine>, sink: Arc<dyn ReminderSink>) -> Self {
        Self {
            engine,
            sink,
            jobs: Arc::new(DashMap::new()),
        }
    }

    /// Register a one-shot job at `fire_at`. Returns `None` — with nothing
    /// registered — when the instant has already passed: a booking made too
    /// close to its start silently gets no reminder.
    pub fn schedule(&self, booking_id: Ulid, fire_at: Ms, payload: ReminderPayload) -> Option<Ulid> {
        let now = self.engine.now_ms();
        if fire_at <= now {
            debug!("reminder instant for booking {booking_id} already passed, not registered");
            metrics::counter!(observability::REMINDERS_SUPPRESSED_TOTAL).increment(1);
            return None;
        }

        let job_id = Ulid::new();
        let delay = Duration::from_millis((fire_at - now) as u64);
        let engine = Arc::clone(&self.engine);
        let sink = Arc::clone(&self.sink);
        let jobs = Arc::clone(&self.jobs);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(engine, sink, jobs, booking_id, job_id, payload).await;
        });

        if let Some(old) = self.jobs.insert(booking_id, Job { job_id, handle }) {
            old.handle.abort();
            debug!("replaced reminder job for booking {booking_id}");
        }
        metrics::counter!(observability::REMINDERS_SCHEDULED_TOTAL).increment(1);
        Some(job_id)
    }

    /// Compute the fire instant (`start − reminder_lead_minutes`) and
    /// register, linking the job id onto the booking record. Linking
    /// failure is advisory: the reminder still fires and the commit that
    /// preceded us stays successful.
    pub async fn schedule_for_booking(&self, booking: &BookingInfo) -> Option<Ulid> {
        let resource_name = match self.engine.get_resource_info(booking.resource_id).await {
            Ok(info) => info.name,
            Err(e) => {
                warn!("no resource for booking {}: {e}", booking.id);
                return None;
            }
        };
        let fire_at = booking.start - self.engine.config.reminder_lead_ms();
        let payload = ReminderPayload {
            booking_id: booking.id,
            contact_id: booking.requester_id,
            resource_name,
            start: booking.start,
            duration_min: booking.duration_min,
        };
        let job = self.schedule(booking.id, fire_at, payload);
        if job.is_some()
            && let Err(e) = self.engine.set_reminder_job(booking.id, job).await
        {
            warn!("could not link reminder job to booking {}: {e}", booking.id);
        }
        job
    }

    /// Cancel the job for a booking. Missing, already-fired, or unknown
    /// keys are not errors.
    pub fn cancel(&self, booking_id: Ulid) {
        if let Some((_, job)) = self.jobs.remove(&booking_id) {
            job.handle.abort();
            debug!("cancelled reminder job for booking {booking_id}");
        }
    }

    /// Jobs currently registered.
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }
}

async fn fire(
    engine: Arc<Engine>,
    sink: Arc<dyn ReminderSink>,
    jobs: Arc<DashMap<Ulid, Job>>,
    booking_id: Ulid,
    job_id: Ulid,
    payload: ReminderPayload,
) {
    // Deregister first, keyed on our own job id. If the booking was
    // re-scheduled meanwhile the key belongs to a newer job and this firing
    // is stale.
    let owned = jobs
        .remove_if(&booking_id, |_, job| job.job_id == job_id)
        .is_some();
    if !owned {
        debug!("stale reminder fire for booking {booking_id} ignored");
        return;
    }

    match engine.get_booking(booking_id).await {
        Ok(info) if info.status == BookingStatus::Confirmed => {
            metrics::counter!(observability::REMINDERS_FIRED_TOTAL).increment(1);
            sink.deliver(payload).await;
        }
        _ => {
            metrics::counter!(observability::REMINDERS_SUPPRESSED_TOTAL).increment(1);
            debug!("booking {booking_id} gone or not confirmed, reminder dropped");
        }
    }
}
