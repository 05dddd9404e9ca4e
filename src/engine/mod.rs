mod conflict;
mod error;
mod mutations;
mod queries;
mod slots;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use slots::SlotIter;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::{DashMap, DashSet};
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::BookingConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking core: resource store, booking ledger, waitlist, blackout
/// rules, and prayer-window cache, all replayed from (and persisted to) one
/// WAL. Every resource-scoped mutation happens under that resource's write
/// lock with the WAL append inside, so check-then-commit is a single atomic
/// unit and a persistence failure leaves no partial state.
pub struct Engine {
    pub(super) state: DashMap<Ulid, SharedResourceState>,
    /// Reverse lookup: booking id → resource id.
    pub(super) booking_index: DashMap<Ulid, Ulid>,
    pub(super) waitlist: DashMap<Ulid, WaitlistEntry>,
    pub(super) blackout_weekly: DashSet<u8>,
    pub(super) blackout_dates: DashSet<NaiveDate>,
    pub(super) prayer_cache: DashMap<NaiveDate, Vec<Ms>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub config: BookingConfig,
    pub(super) clock: Arc<dyn Clock>,
}

/// Apply a resource-scoped event (no locking — caller holds the lock).
fn apply_to_resource(rs: &mut ResourceState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ResourceUpdated { name, category, .. } => {
            rs.name = name.clone();
            rs.category = category.clone();
        }
        Event::ResourceToggled { active, .. } => {
            rs.active = *active;
            rs.inactive = None;
        }
        Event::InactivityScheduled { window, active, .. } => {
            rs.inactive = Some(*window);
            rs.active = *active;
        }
        Event::InactivityCancelled { .. } => {
            rs.active = true;
            rs.inactive = None;
        }
        Event::SweepDeactivated { .. } => {
            rs.active = false;
        }
        Event::SweepReactivated { .. } => {
            rs.active = true;
            rs.inactive = None;
        }
        Event::BookingCommitted { booking } => {
            booking_index.insert(booking.id, booking.resource_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingSubjectEdited {
            id,
            subject_name,
            subject_address,
        } => {
            if let Some(b) = rs.booking_mut(*id) {
                if let Some(name) = subject_name {
                    b.subject_name = name.clone();
                }
                if let Some(address) = subject_address {
                    b.subject_address = address.clone();
                }
            }
        }
        Event::BookingStatusChanged { id, status } => {
            if let Some(b) = rs.booking_mut(*id) {
                b.status = *status;
            }
        }
        Event::ReminderJobSet { id, job_id } => {
            if let Some(b) = rs.booking_mut(*id) {
                b.reminder_job_id = *job_id;
            }
        }
        // Engine-scoped events are handled above this layer
        _ => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        config: BookingConfig,
        clock: Arc<dyn Clock>,
        notify: Arc<NotifyHub>,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::Validation)?;

        let events = Wal::replay(&wal_path).map_err(|e| EngineError::WalError(e.to_string()))?;
        let wal = Wal::open(&wal_path).map_err(|e| EngineError::WalError(e.to_string()))?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            booking_index: DashMap::new(),
            waitlist: DashMap::new(),
            blackout_weekly: DashSet::new(),
            blackout_dates: DashSet::new(),
            prayer_cache: DashMap::new(),
            wal_tx,
            notify,
            config,
            clock,
        };

        // Replay — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use
        // blocking_read/blocking_write here because this runs inside an
        // async context.
        for event in &events {
            engine.apply_engine_event(event);
        }

        Ok(engine)
    }

    /// Apply one event to engine-level state. Resource-scoped events are
    /// routed to the owning resource via an uncontended write — only valid
    /// during replay or for the global-event persist path.
    fn apply_engine_event(&self, event: &Event) {
        match event {
            Event::ResourceCreated {
                id,
                name,
                category,
                active,
                inactive,
            } => {
                let mut rs = ResourceState::new(*id, name.clone(), category.clone());
                rs.active = *active;
                rs.inactive = *inactive;
                self.state.insert(*id, Arc::new(RwLock::new(rs)));
            }
            Event::ResourceDeleted { id } => {
                if let Some((_, rs)) = self.state.remove(id) {
                    let guard = rs.try_read().expect("replay: uncontended read");
                    for b in &guard.bookings {
                        self.booking_index.remove(&b.id);
                    }
                }
            }
            Event::BookingMoved {
                id,
                resource_id,
                span,
            } => self.apply_booking_moved(*id, *resource_id, *span),
            Event::WaitlistJoined { entry } => {
                self.waitlist.insert(entry.id, entry.clone());
            }
            Event::WaitlistRemoved { id } => {
                self.waitlist.remove(id);
            }
            Event::BlackoutWeekdayAdded { weekday } => {
                self.blackout_weekly.insert(*weekday);
            }
            Event::BlackoutWeekdayRemoved { weekday } => {
                self.blackout_weekly.remove(weekday);
            }
            Event::BlackoutDateAdded { date } => {
                self.blackout_dates.insert(*date);
            }
            Event::BlackoutDateRemoved { date } => {
                self.blackout_dates.remove(date);
            }
            Event::PrayerTimesCached { date, instants } => {
                self.prayer_cache.insert(*date, instants.clone());
            }
            Event::PrayerCachePruned { before } => {
                self.prayer_cache.retain(|date, _| date >= before);
            }
            other => {
                if let Some(resource_id) = self.event_resource_id(other)
                    && let Some(entry) = self.state.get(&resource_id)
                {
                    let rs_arc = entry.value().clone();
                    drop(entry);
                    let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                    apply_to_resource(&mut guard, other, &self.booking_index);
                }
            }
        }
    }

    /// Replay path of a reschedule: re-time in place or move between
    /// resources, keeping the reverse index consistent.
    fn apply_booking_moved(&self, id: Ulid, resource_id: Ulid, span: Span) {
        let Some(from) = self.resource_for_booking(&id) else {
            return;
        };
        let Some(from_rs) = self.get_resource(&from) else {
            return;
        };
        let mut from_guard = from_rs.try_write().expect("replay: uncontended write");
        let Some(mut booking) = from_guard.remove_booking(id) else {
            return;
        };
        booking.span = span;
        if from == resource_id {
            from_guard.insert_booking(booking);
            return;
        }
        drop(from_guard);
        if let Some(to_rs) = self.get_resource(&resource_id) {
            booking.resource_id = resource_id;
            let mut to_guard = to_rs.try_write().expect("replay: uncontended write");
            to_guard.insert_booking(booking);
            self.booking_index.insert(id, resource_id);
        }
    }

    /// Extract the owning resource for a resource-scoped event.
    fn event_resource_id(&self, event: &Event) -> Option<Ulid> {
        match event {
            Event::ResourceUpdated { id, .. }
            | Event::ResourceToggled { id, .. }
            | Event::InactivityScheduled { id, .. }
            | Event::InactivityCancelled { id }
            | Event::SweepDeactivated { id }
            | Event::SweepReactivated { id } => Some(*id),
            Event::BookingCommitted { booking } => Some(booking.resource_id),
            Event::BookingSubjectEdited { id, .. }
            | Event::BookingStatusChanged { id, .. }
            | Event::ReminderJobSet { id, .. } => self.resource_for_booking(id),
            _ => None,
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn resource_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    /// Current instant per the injected clock.
    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// WAL-append + apply + notify in one call, with the caller holding the
    /// resource write lock. The append comes first: if it fails, nothing
    /// was applied.
    pub(super) async fn persist_and_apply(
        &self,
        resource_id: Ulid,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.booking_index);
        self.notify.send(resource_id, event);
        Ok(())
    }

    /// WAL-append + apply + notify for engine-scoped events (waitlist,
    /// blackout rules, prayer cache).
    pub(super) async fn persist_global(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_engine_event(event);
        self.notify.send_global(event);
        Ok(())
    }

    /// Lookup booking → resource, get resource, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .resource_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.write_owned().await;
        Ok((resource_id, guard))
    }
}
