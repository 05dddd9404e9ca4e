//! Time source and civil-time conversion.
//!
//! All interval math runs on `Ms` (Unix milliseconds). Wall-clock
//! decomposition — dates, hours, weekdays — happens at a single configured
//! UTC offset; the system is single-timezone by design.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Utc};

use crate::model::Ms;

/// Source of the current instant. Injected everywhere a decision depends on
/// "now" so tests can pin the clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as Ms
    }
}

/// Settable clock for tests.
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start: Ms) -> Self {
        Self(AtomicI64::new(start))
    }

    pub fn set(&self, now: Ms) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: Ms) {
        self.0.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.0.load(Ordering::SeqCst)
    }
}

/// Build the fixed offset for a configured UTC offset in minutes.
pub fn offset_from_minutes(utc_offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_minutes * 60).expect("UTC offset out of range")
}

/// Local civil datetime of an instant. Instants are validated against
/// `limits` at every input boundary, so the conversion cannot fail.
pub fn to_local(ms: Ms, tz: FixedOffset) -> DateTime<FixedOffset> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .expect("timestamp within validated range")
        .with_timezone(&tz)
}

/// Local calendar date of an instant.
pub fn local_date(ms: Ms, tz: FixedOffset) -> NaiveDate {
    to_local(ms, tz).date_naive()
}

/// Instant at a local wall-clock time on a date. A fixed offset has no
/// gaps or folds, so the mapping is total for valid hour/minute.
pub fn ms_at(date: NaiveDate, hour: u32, minute: u32, tz: FixedOffset) -> Ms {
    let ndt = date
        .and_hms_opt(hour, minute, 0)
        .expect("valid wall-clock time");
    tz.from_local_datetime(&ndt)
        .single()
        .expect("fixed offset is unambiguous")
        .timestamp_millis()
}

/// Weekday index with Monday = 0, matching the recurring blackout rules.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_monday() as u8
}
