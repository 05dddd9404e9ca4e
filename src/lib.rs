//! Booking core for fixed-duration therapy sessions.
//!
//! The engine owns all durable state (resources, bookings, waitlist,
//! blackout rules, prayer-window cache) behind an append-only WAL, and
//! serializes every mutation per resource so that conflict checks and
//! commits are one atomic unit. Around it sit the slot generator, the
//! prayer-window blocker, the reminder scheduler, and the activation
//! sweeper. The conversational front-end lives elsewhere and talks to
//! this crate through the public API plus the `ReminderSink` and
//! `PrayerTimesProvider` traits.

pub mod activator;
pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod prayer;
pub mod reminder;
pub mod wal;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BookingConfig;
pub use engine::{Engine, EngineError};
pub use model::{
    Booking, BookingInfo, BookingStatus, Event, Ms, ResourceInfo, Span, WaitlistEntry,
};
pub use notify::NotifyHub;
pub use prayer::{AladhanClient, PrayerBlocker, PrayerTimesProvider, ProviderError};
pub use reminder::{ReminderPayload, ReminderScheduler, ReminderSink};
