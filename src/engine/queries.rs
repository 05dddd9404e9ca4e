use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_SESSION_MINUTES;
use crate::model::*;

use super::conflict::{check_is_free, validate_span};
use super::{Engine, EngineError, SharedResourceState};

impl Engine {
    fn resource_arcs(&self) -> Vec<SharedResourceState> {
        // Snapshot the Arcs first; never hold a map shard across an await.
        self.state.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn list_resources(&self, active_only: bool) -> Vec<ResourceInfo> {
        let mut out = Vec::new();
        for rs in self.resource_arcs() {
            let guard = rs.read().await;
            if !active_only || guard.active {
                out.push(ResourceInfo::from_state(&guard));
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn get_resource_info(&self, id: Ulid) -> Result<ResourceInfo, EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(ResourceInfo::from_state(&guard))
    }

    /// Advisory availability check; the commit path re-evaluates the same
    /// predicate under the resource write lock.
    pub async fn is_free(
        &self,
        resource_id: Ulid,
        start: Ms,
        duration_min: i64,
    ) -> Result<bool, EngineError> {
        if duration_min < 1 || duration_min > MAX_SESSION_MINUTES {
            return Err(EngineError::Validation("session duration out of range"));
        }
        let span = Span::from_minutes(start, duration_min);
        validate_span(&span)?;

        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(check_is_free(&guard, &span).is_ok())
    }

    /// Active resources that could take this span, optionally restricted to
    /// a category tag. Sorted by name for stable presentation.
    pub async fn free_resources_at(
        &self,
        start: Ms,
        duration_min: i64,
        category: Option<&str>,
    ) -> Result<Vec<ResourceInfo>, EngineError> {
        if duration_min < 1 || duration_min > MAX_SESSION_MINUTES {
            return Err(EngineError::Validation("session duration out of range"));
        }
        let span = Span::from_minutes(start, duration_min);
        validate_span(&span)?;

        let mut out = Vec::new();
        for rs in self.resource_arcs() {
            let guard = rs.read().await;
            if !guard.active {
                continue;
            }
            if let Some(cat) = category
                && guard.category != cat
            {
                continue;
            }
            if check_is_free(&guard, &span).is_ok() {
                out.push(ResourceInfo::from_state(&guard));
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<BookingInfo, EngineError> {
        let resource_id = self
            .resource_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        guard
            .booking(id)
            .map(BookingInfo::from)
            .ok_or(EngineError::NotFound(id))
    }

    /// All bookings on a resource, optionally filtered by status. An
    /// unknown resource yields an empty list, matching the other list
    /// queries.
    pub async fn bookings_for_resource(
        &self,
        resource_id: Ulid,
        status: Option<BookingStatus>,
    ) -> Vec<BookingInfo> {
        let Some(rs) = self.get_resource(&resource_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard
            .bookings
            .iter()
            .filter(|b| status.is_none_or(|s| b.status == s))
            .map(BookingInfo::from)
            .collect()
    }

    /// Confirmed bookings starting after now, ascending — the reminder
    /// re-registration set after a consumer restart.
    pub async fn upcoming_bookings(&self) -> Vec<BookingInfo> {
        let now = self.now_ms();
        let mut out = Vec::new();
        for rs in self.resource_arcs() {
            let guard = rs.read().await;
            for b in &guard.bookings {
                if b.status == BookingStatus::Confirmed && b.span.start > now {
                    out.push(BookingInfo::from(b));
                }
            }
        }
        out.sort_by_key(|b| b.start);
        out
    }

    /// Booking history for one requester, most recent first.
    pub async fn bookings_for_requester(&self, requester_id: i64) -> Vec<BookingInfo> {
        let mut out = Vec::new();
        for rs in self.resource_arcs() {
            let guard = rs.read().await;
            for b in &guard.bookings {
                if b.requester_id == requester_id {
                    out.push(BookingInfo::from(b));
                }
            }
        }
        out.sort_by_key(|b| std::cmp::Reverse(b.start));
        out
    }

    // ── Waitlist ─────────────────────────────────────────────

    pub fn list_waitlist(&self) -> Vec<WaitlistEntry> {
        let mut out: Vec<WaitlistEntry> =
            self.waitlist.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|e| (e.created_at, e.id));
        out
    }

    pub fn get_waitlist_entry(&self, id: Ulid) -> Result<WaitlistEntry, EngineError> {
        self.waitlist
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Entries that asked for a specific date — the manual resolution flow
    /// consults this when a slot frees up.
    pub fn waitlist_for_date(&self, date: NaiveDate) -> Vec<WaitlistEntry> {
        let mut out: Vec<WaitlistEntry> = self
            .waitlist
            .iter()
            .filter(|e| e.value().requested_date == Some(date))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|e| (e.created_at, e.id));
        out
    }

    // ── Blackout rules ───────────────────────────────────────

    pub fn list_blackout_weekdays(&self) -> Vec<u8> {
        let mut out: Vec<u8> = self.blackout_weekly.iter().map(|d| *d.key()).collect();
        out.sort_unstable();
        out
    }

    pub fn list_blackout_dates(&self) -> Vec<NaiveDate> {
        let mut out: Vec<NaiveDate> = self.blackout_dates.iter().map(|d| *d.key()).collect();
        out.sort_unstable();
        out
    }

    // ── Prayer-window cache ──────────────────────────────────

    pub fn prayer_times_for(&self, date: NaiveDate) -> Option<Vec<Ms>> {
        self.prayer_cache.get(&date).map(|e| e.value().clone())
    }
}
