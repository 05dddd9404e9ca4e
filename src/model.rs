use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// One minute in `Ms`.
pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span from a start instant and a duration in minutes.
    pub fn from_minutes(start: Ms, duration_min: i64) -> Self {
        Self::new(start, start + duration_min * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn duration_min(&self) -> i64 {
        self.duration_ms() / MINUTE_MS
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Booking lifecycle. Only `Confirmed` bookings occupy the resource;
/// `Completed` and `Cancelled` records are retained, never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn label(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

/// A session booked on a resource. Lives inside its resource's state so the
/// resource lock serializes every check-then-write on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    /// Contact id of whoever made the booking (chat id in the front-end).
    pub requester_id: i64,
    pub subject_name: String,
    pub subject_category: String,
    pub subject_address: String,
    pub span: Span,
    pub status: BookingStatus,
    pub created_at: Ms,
    /// Reminder job currently registered for this booking, if any.
    /// Job handles are process-local; a restarted consumer re-schedules.
    pub reminder_job_id: Option<Ulid>,
}

impl Booking {
    pub fn duration_min(&self) -> i64 {
        self.span.duration_min()
    }

    pub fn blocks(&self) -> bool {
        matches!(self.status, BookingStatus::Confirmed)
    }
}

/// A pending request recorded when no slot or resource was available.
/// Resolution is manual: an external admin action lists, inspects, and
/// removes entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Ulid,
    pub contact_id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub category: String,
    pub requested_date: Option<NaiveDate>,
    pub created_at: Ms,
}

/// Mutable state of one bookable resource (a therapist).
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: String,
    /// Provider tag used for matching (gender in the source deployment).
    pub category: String,
    pub active: bool,
    /// Scheduled inactivity window `[start, end)`.
    pub inactive: Option<Span>,
    /// All bookings ever taken on this resource, sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl ResourceState {
    pub fn new(id: Ulid, name: String, category: String) -> Self {
        Self {
            id,
            name,
            category,
            active: true,
            inactive: None,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    /// Remove a booking by id.
    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        name: String,
        category: String,
        active: bool,
        inactive: Option<Span>,
    },
    ResourceUpdated {
        id: Ulid,
        name: String,
        category: String,
    },
    ResourceDeleted {
        id: Ulid,
    },
    /// Manual toggle: flips the flag and clears any scheduled window.
    ResourceToggled {
        id: Ulid,
        active: bool,
    },
    /// Records a window; `active` is false when the window already started.
    InactivityScheduled {
        id: Ulid,
        window: Span,
        active: bool,
    },
    /// Explicit cancel: forces active and clears the window.
    InactivityCancelled {
        id: Ulid,
    },
    SweepDeactivated {
        id: Ulid,
    },
    SweepReactivated {
        id: Ulid,
    },
    BookingCommitted {
        booking: Booking,
    },
    /// Reschedule, possibly onto a different resource.
    BookingMoved {
        id: Ulid,
        resource_id: Ulid,
        span: Span,
    },
    BookingSubjectEdited {
        id: Ulid,
        subject_name: Option<String>,
        subject_address: Option<String>,
    },
    BookingStatusChanged {
        id: Ulid,
        status: BookingStatus,
    },
    ReminderJobSet {
        id: Ulid,
        job_id: Option<Ulid>,
    },
    WaitlistJoined {
        entry: WaitlistEntry,
    },
    WaitlistRemoved {
        id: Ulid,
    },
    BlackoutWeekdayAdded {
        weekday: u8,
    },
    BlackoutWeekdayRemoved {
        weekday: u8,
    },
    BlackoutDateAdded {
        date: NaiveDate,
    },
    BlackoutDateRemoved {
        date: NaiveDate,
    },
    PrayerTimesCached {
        date: NaiveDate,
        instants: Vec<Ms>,
    },
    PrayerCachePruned {
        before: NaiveDate,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: String,
    pub category: String,
    pub active: bool,
    pub inactive: Option<Span>,
}

impl ResourceInfo {
    pub(crate) fn from_state(rs: &ResourceState) -> Self {
        Self {
            id: rs.id,
            name: rs.name.clone(),
            category: rs.category.clone(),
            active: rs.active,
            inactive: rs.inactive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub requester_id: i64,
    pub subject_name: String,
    pub subject_category: String,
    pub subject_address: String,
    pub start: Ms,
    pub duration_min: i64,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub reminder_job_id: Option<Ulid>,
}

impl BookingInfo {
    pub fn span(&self) -> Span {
        Span::from_minutes(self.start, self.duration_min)
    }
}

impl From<&Booking> for BookingInfo {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            resource_id: b.resource_id,
            requester_id: b.requester_id,
            subject_name: b.subject_name.clone(),
            subject_category: b.subject_category.clone(),
            subject_address: b.subject_address.clone(),
            start: b.span.start,
            duration_min: b.duration_min(),
            status: b.status,
            created_at: b.created_at,
            reminder_job_id: b.reminder_job_id,
        }
    }
}
