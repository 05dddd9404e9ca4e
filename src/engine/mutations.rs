use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{
    check_is_free, check_is_free_excluding, validate_address, validate_category, validate_name,
    validate_phone, validate_span,
};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Resource administration ──────────────────────────────

    pub async fn create_resource(
        &self,
        name: &str,
        category: &str,
    ) -> Result<ResourceInfo, EngineError> {
        validate_name(name)?;
        validate_category(category)?;
        if self.state.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }

        let id = Ulid::new();
        let event = Event::ResourceCreated {
            id,
            name: name.to_string(),
            category: category.to_string(),
            active: true,
            inactive: None,
        };
        self.wal_append(&event).await?;
        let rs = ResourceState::new(id, name.to_string(), category.to_string());
        let info = ResourceInfo::from_state(&rs);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);
        Ok(info)
    }

    pub async fn update_resource(
        &self,
        id: Ulid,
        name: &str,
        category: &str,
    ) -> Result<(), EngineError> {
        validate_name(name)?;
        validate_category(category)?;
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::ResourceUpdated {
            id,
            name: name.to_string(),
            category: category.to_string(),
        };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Resources referenced by bookings are never hard-deleted.
    pub async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write().await;
        if !guard.bookings.is_empty() {
            return Err(EngineError::ResourceInUse(id));
        }

        let event = Event::ResourceDeleted { id };
        self.wal_append(&event).await?;
        // Unlink from the map before releasing the write guard so a racing
        // commit can't observe a deleted-but-present resource.
        self.state.remove(&id);
        drop(guard);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    /// Manual toggle: flips the active flag immediately and clears any
    /// scheduled inactivity window, independent of sweep timing.
    pub async fn toggle_active(&self, id: Ulid) -> Result<bool, EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        let active = !guard.active;

        let event = Event::ResourceToggled { id, active };
        self.persist_and_apply(id, &mut guard, &event).await?;
        Ok(active)
    }

    /// Record an inactivity window `[start, end)`. A window that has
    /// already started deactivates the resource immediately; a future one
    /// is left for the sweeper.
    pub async fn schedule_inactivity(
        &self,
        id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<(), EngineError> {
        if start >= end {
            return Err(EngineError::Validation(
                "inactivity window start must be before end",
            ));
        }
        let window = Span::new(start, end);
        validate_span(&window)?;

        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        let active = if window.start <= self.now_ms() {
            false
        } else {
            guard.active
        };

        let event = Event::InactivityScheduled { id, window, active };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Explicit cancel: forces `active = true` and clears the window,
    /// regardless of whether deactivation already fired.
    pub async fn cancel_inactivity_schedule(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::InactivityCancelled { id };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    // ── Activation sweep ─────────────────────────────────────

    /// Scan for resources whose scheduled window makes them due for a
    /// transition. Non-blocking reads: a resource whose lock is contended
    /// is simply picked up by the next sweep.
    pub fn collect_activation_due(&self, now: Ms) -> (Vec<Ulid>, Vec<Ulid>) {
        let mut to_deactivate = Vec::new();
        let mut to_reactivate = Vec::new();
        for entry in self.state.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read()
                && let Some(window) = guard.inactive
            {
                if guard.active && window.start <= now {
                    to_deactivate.push(guard.id);
                } else if !guard.active && window.end <= now {
                    to_reactivate.push(guard.id);
                }
            }
        }
        (to_deactivate, to_reactivate)
    }

    /// Deactivate if (and only if) the window start has arrived. The
    /// condition is re-checked under the write lock because manual edits
    /// race with the sweep. Returns whether a transition was applied.
    pub async fn sweep_deactivate(&self, id: Ulid) -> Result<bool, EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        let now = self.now_ms();
        let due = guard.active && guard.inactive.is_some_and(|w| w.start <= now);
        if !due {
            return Ok(false);
        }

        let event = Event::SweepDeactivated { id };
        self.persist_and_apply(id, &mut guard, &event).await?;
        Ok(true)
    }

    /// Reactivate once the window has elapsed, clearing it. Same
    /// re-check-under-lock discipline as deactivation.
    pub async fn sweep_reactivate(&self, id: Ulid) -> Result<bool, EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        let now = self.now_ms();
        let due = !guard.active && guard.inactive.is_some_and(|w| w.end <= now);
        if !due {
            return Ok(false);
        }

        let event = Event::SweepReactivated { id };
        self.persist_and_apply(id, &mut guard, &event).await?;
        Ok(true)
    }

    // ── Booking ledger ───────────────────────────────────────

    /// Check-then-commit as one atomic unit: the availability predicate is
    /// re-evaluated under the resource write lock, and the WAL append
    /// happens before any in-memory mutation. A read-time `is_free` answer
    /// is advisory only.
    #[allow(clippy::too_many_arguments)]
    pub async fn commit_booking(
        &self,
        resource_id: Ulid,
        requester_id: i64,
        subject_name: &str,
        subject_category: &str,
        subject_address: &str,
        start: Ms,
        duration_min: i64,
    ) -> Result<BookingInfo, EngineError> {
        validate_name(subject_name)?;
        validate_category(subject_category)?;
        validate_address(subject_address)?;
        if duration_min < 1 || duration_min > MAX_SESSION_MINUTES {
            return Err(EngineError::Validation("session duration out of range"));
        }
        let span = Span::from_minutes(start, duration_min);
        validate_span(&span)?;

        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }

        if let Err(e) = check_is_free(&guard, &span) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let booking = Booking {
            id: Ulid::new(),
            resource_id,
            requester_id,
            subject_name: subject_name.to_string(),
            subject_category: subject_category.to_string(),
            subject_address: subject_address.to_string(),
            span,
            status: BookingStatus::Confirmed,
            created_at: self.now_ms(),
            reminder_job_id: None,
        };
        let info = BookingInfo::from(&booking);

        let event = Event::BookingCommitted { booking };
        self.persist_and_apply(resource_id, &mut guard, &event)
            .await?;
        metrics::counter!(observability::BOOKINGS_COMMITTED_TOTAL).increment(1);
        Ok(info)
    }

    /// Confirmed → Cancelled. The record is retained; cancelling an
    /// already-cancelled booking is a no-op returning the record, so the
    /// external waitlist hook is never notified twice.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<BookingInfo, EngineError> {
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if current.status == BookingStatus::Cancelled {
            return Ok(BookingInfo::from(current));
        }

        let event = Event::BookingStatusChanged {
            id,
            status: BookingStatus::Cancelled,
        };
        self.persist_and_apply(resource_id, &mut guard, &event)
            .await?;
        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        Ok(BookingInfo::from(
            guard.booking(id).expect("booking still present"),
        ))
    }

    pub async fn complete_booking(&self, id: Ulid) -> Result<BookingInfo, EngineError> {
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if current.status != BookingStatus::Confirmed {
            return Err(EngineError::Validation(
                "only confirmed bookings can be completed",
            ));
        }

        let event = Event::BookingStatusChanged {
            id,
            status: BookingStatus::Completed,
        };
        self.persist_and_apply(resource_id, &mut guard, &event)
            .await?;
        Ok(BookingInfo::from(
            guard.booking(id).expect("booking still present"),
        ))
    }

    /// Move a booking to a new start/duration, possibly onto a different
    /// resource. The target is conflict-checked with the booking itself
    /// excluded; for a cross-resource move both locks are taken in sorted
    /// id order.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        new_resource_id: Ulid,
        start: Ms,
        duration_min: i64,
    ) -> Result<BookingInfo, EngineError> {
        if duration_min < 1 || duration_min > MAX_SESSION_MINUTES {
            return Err(EngineError::Validation("session duration out of range"));
        }
        let span = Span::from_minutes(start, duration_min);
        validate_span(&span)?;

        let from = self
            .resource_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;

        if from == new_resource_id {
            let rs = self.get_resource(&from).ok_or(EngineError::NotFound(from))?;
            let mut guard = rs.write().await;
            guard.booking(id).ok_or(EngineError::NotFound(id))?;
            if let Err(e) = check_is_free_excluding(&guard, &span, id) {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                return Err(e);
            }

            let event = Event::BookingMoved {
                id,
                resource_id: from,
                span,
            };
            self.wal_append(&event).await?;
            let mut booking = guard.remove_booking(id).expect("checked above");
            booking.span = span;
            guard.insert_booking(booking);
            self.notify.send(from, &event);
            return Ok(BookingInfo::from(
                guard.booking(id).expect("booking still present"),
            ));
        }

        let from_rs = self.get_resource(&from).ok_or(EngineError::NotFound(from))?;
        let to_rs = self
            .get_resource(&new_resource_id)
            .ok_or(EngineError::NotFound(new_resource_id))?;

        // Acquire write locks in sorted order to prevent deadlocks.
        let (mut from_guard, mut to_guard) = if from < new_resource_id {
            let f = from_rs.clone().write_owned().await;
            let t = to_rs.clone().write_owned().await;
            (f, t)
        } else {
            let t = to_rs.clone().write_owned().await;
            let f = from_rs.clone().write_owned().await;
            (f, t)
        };

        from_guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if to_guard.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }
        if let Err(e) = check_is_free(&to_guard, &span) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let event = Event::BookingMoved {
            id,
            resource_id: new_resource_id,
            span,
        };
        self.wal_append(&event).await?;
        let mut booking = from_guard.remove_booking(id).expect("checked above");
        booking.resource_id = new_resource_id;
        booking.span = span;
        to_guard.insert_booking(booking);
        self.booking_index.insert(id, new_resource_id);
        self.notify.send(from, &event);
        self.notify.send(new_resource_id, &event);
        Ok(BookingInfo::from(
            to_guard.booking(id).expect("booking just moved"),
        ))
    }

    pub async fn edit_booking_subject(
        &self,
        id: Ulid,
        subject_name: Option<&str>,
        subject_address: Option<&str>,
    ) -> Result<BookingInfo, EngineError> {
        if let Some(name) = subject_name {
            validate_name(name)?;
        }
        if let Some(address) = subject_address {
            validate_address(address)?;
        }
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        guard.booking(id).ok_or(EngineError::NotFound(id))?;

        let event = Event::BookingSubjectEdited {
            id,
            subject_name: subject_name.map(String::from),
            subject_address: subject_address.map(String::from),
        };
        self.persist_and_apply(resource_id, &mut guard, &event)
            .await?;
        Ok(BookingInfo::from(
            guard.booking(id).expect("booking still present"),
        ))
    }

    /// Link (or clear) the reminder job registered for a booking.
    pub async fn set_reminder_job(
        &self,
        id: Ulid,
        job_id: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        guard.booking(id).ok_or(EngineError::NotFound(id))?;

        let event = Event::ReminderJobSet { id, job_id };
        self.persist_and_apply(resource_id, &mut guard, &event)
            .await
    }

    // ── Waitlist ─────────────────────────────────────────────

    pub async fn join_waitlist(
        &self,
        contact_id: i64,
        name: &str,
        phone: Option<&str>,
        category: &str,
        requested_date: Option<NaiveDate>,
    ) -> Result<WaitlistEntry, EngineError> {
        validate_name(name)?;
        validate_category(category)?;
        validate_phone(phone)?;
        if self.waitlist.len() >= MAX_WAITLIST_ENTRIES {
            return Err(EngineError::LimitExceeded("waitlist full"));
        }

        let entry = WaitlistEntry {
            id: Ulid::new(),
            contact_id,
            name: name.to_string(),
            phone: phone.map(String::from),
            category: category.to_string(),
            requested_date,
            created_at: self.now_ms(),
        };
        let event = Event::WaitlistJoined {
            entry: entry.clone(),
        };
        self.persist_global(&event).await?;
        Ok(entry)
    }

    pub async fn remove_waitlist_entry(&self, id: Ulid) -> Result<WaitlistEntry, EngineError> {
        let entry = self
            .waitlist
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        self.persist_global(&Event::WaitlistRemoved { id }).await?;
        Ok(entry)
    }

    // ── Blackout rules ───────────────────────────────────────

    pub async fn add_blackout_weekday(&self, weekday: u8) -> Result<(), EngineError> {
        if weekday > 6 {
            return Err(EngineError::Validation("weekday must be 0..=6, Monday = 0"));
        }
        if self.blackout_weekly.contains(&weekday) {
            return Ok(());
        }
        self.persist_global(&Event::BlackoutWeekdayAdded { weekday })
            .await
    }

    pub async fn remove_blackout_weekday(&self, weekday: u8) -> Result<(), EngineError> {
        if !self.blackout_weekly.contains(&weekday) {
            return Ok(());
        }
        self.persist_global(&Event::BlackoutWeekdayRemoved { weekday })
            .await
    }

    pub async fn add_blackout_date(&self, date: NaiveDate) -> Result<(), EngineError> {
        if self.blackout_dates.contains(&date) {
            return Ok(());
        }
        self.persist_global(&Event::BlackoutDateAdded { date }).await
    }

    pub async fn remove_blackout_date(&self, date: NaiveDate) -> Result<(), EngineError> {
        if !self.blackout_dates.contains(&date) {
            return Ok(());
        }
        self.persist_global(&Event::BlackoutDateRemoved { date })
            .await
    }

    // ── Prayer-window cache ──────────────────────────────────

    /// Persist a day's fetched instants. Providers returning fewer than
    /// five instants simply contribute fewer blocks.
    pub async fn save_prayer_times(
        &self,
        date: NaiveDate,
        mut instants: Vec<Ms>,
    ) -> Result<(), EngineError> {
        instants.truncate(PRAYER_INSTANTS_PER_DAY);
        instants.sort_unstable();
        for t in &instants {
            if *t < MIN_VALID_TIMESTAMP_MS || *t > MAX_VALID_TIMESTAMP_MS {
                return Err(EngineError::LimitExceeded("timestamp out of range"));
            }
        }
        self.persist_global(&Event::PrayerTimesCached { date, instants })
            .await
    }

    /// Drop cache entries dated before `before`. Returns how many were
    /// dropped.
    pub async fn prune_prayer_cache(&self, before: NaiveDate) -> Result<usize, EngineError> {
        let stale = self
            .prayer_cache
            .iter()
            .filter(|e| *e.key() < before)
            .count();
        if stale == 0 {
            return Ok(0);
        }
        self.persist_global(&Event::PrayerCachePruned { before })
            .await?;
        Ok(stale)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let arcs: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        for rs in arcs {
            let guard = rs.read().await;
            events.push(Event::ResourceCreated {
                id: guard.id,
                name: guard.name.clone(),
                category: guard.category.clone(),
                active: guard.active,
                inactive: guard.inactive,
            });
            for booking in &guard.bookings {
                events.push(Event::BookingCommitted {
                    booking: booking.clone(),
                });
            }
        }
        for entry in self.waitlist.iter() {
            events.push(Event::WaitlistJoined {
                entry: entry.value().clone(),
            });
        }
        for weekday in self.blackout_weekly.iter() {
            events.push(Event::BlackoutWeekdayAdded { weekday: *weekday.key() });
        }
        for date in self.blackout_dates.iter() {
            events.push(Event::BlackoutDateAdded { date: *date.key() });
        }
        for entry in self.prayer_cache.iter() {
            events.push(Event::PrayerTimesCached {
                date: *entry.key(),
                instants: entry.value().clone(),
            });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
