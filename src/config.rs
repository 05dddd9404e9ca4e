//! Named, defaulted configuration for the booking core.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::clock::offset_from_minutes;
use crate::model::{MINUTE_MS, Ms};

/// All tunables of the core. Defaults mirror the production deployment:
/// 09:00–18:00 working day, 12:00–13:00 break, 40-minute grid and
/// sessions, Jakarta offset and coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    pub start_hour: u32,
    pub end_hour: u32,
    pub break_start_hour: u32,
    pub break_end_hour: u32,
    pub interval_minutes: i64,
    pub session_minutes: i64,
    pub max_days_ahead: u32,
    pub reminder_lead_minutes: i64,
    pub min_booking_buffer_minutes: i64,
    pub prayer_block_half_width_minutes: i64,
    pub prefetch_horizon_days: u32,
    /// Minutes east of UTC for the single operating timezone.
    pub utc_offset_minutes: i32,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 18,
            break_start_hour: 12,
            break_end_hour: 13,
            interval_minutes: 40,
            session_minutes: 40,
            max_days_ahead: 30,
            reminder_lead_minutes: 30,
            min_booking_buffer_minutes: 5,
            prayer_block_half_width_minutes: 10,
            prefetch_horizon_days: 30,
            utc_offset_minutes: 7 * 60,
            latitude: -6.2088,
            longitude: 106.8456,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl BookingConfig {
    /// Read overrides from `JADWAL_*` environment variables, falling back
    /// to defaults field by field.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            start_hour: env_parse("JADWAL_START_HOUR", d.start_hour),
            end_hour: env_parse("JADWAL_END_HOUR", d.end_hour),
            break_start_hour: env_parse("JADWAL_BREAK_START_HOUR", d.break_start_hour),
            break_end_hour: env_parse("JADWAL_BREAK_END_HOUR", d.break_end_hour),
            interval_minutes: env_parse("JADWAL_INTERVAL_MINUTES", d.interval_minutes),
            session_minutes: env_parse("JADWAL_SESSION_MINUTES", d.session_minutes),
            max_days_ahead: env_parse("JADWAL_MAX_DAYS_AHEAD", d.max_days_ahead),
            reminder_lead_minutes: env_parse(
                "JADWAL_REMINDER_LEAD_MINUTES",
                d.reminder_lead_minutes,
            ),
            min_booking_buffer_minutes: env_parse(
                "JADWAL_MIN_BOOKING_BUFFER_MINUTES",
                d.min_booking_buffer_minutes,
            ),
            prayer_block_half_width_minutes: env_parse(
                "JADWAL_PRAYER_BLOCK_HALF_WIDTH_MINUTES",
                d.prayer_block_half_width_minutes,
            ),
            prefetch_horizon_days: env_parse(
                "JADWAL_PREFETCH_HORIZON_DAYS",
                d.prefetch_horizon_days,
            ),
            utc_offset_minutes: env_parse("JADWAL_UTC_OFFSET_MINUTES", d.utc_offset_minutes),
            latitude: env_parse("JADWAL_LATITUDE", d.latitude),
            longitude: env_parse("JADWAL_LONGITUDE", d.longitude),
        }
    }

    /// Reject configurations that cannot describe a working day.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err("working hours must be between 0 and 23");
        }
        if self.start_hour >= self.end_hour {
            return Err("start hour must be before end hour");
        }
        if self.break_start_hour > self.break_end_hour {
            return Err("break start must not be after break end");
        }
        if self.break_end_hour > 23 {
            return Err("break hours must be between 0 and 23");
        }
        if self.interval_minutes < 1 {
            return Err("slot interval must be at least one minute");
        }
        if self.session_minutes < 1 {
            return Err("session duration must be at least one minute");
        }
        if self.prayer_block_half_width_minutes < 0 {
            return Err("prayer block half-width must not be negative");
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err("UTC offset out of range");
        }
        Ok(())
    }

    pub fn tz(&self) -> FixedOffset {
        offset_from_minutes(self.utc_offset_minutes)
    }

    pub fn interval_ms(&self) -> Ms {
        self.interval_minutes * MINUTE_MS
    }

    pub fn session_ms(&self) -> Ms {
        self.session_minutes * MINUTE_MS
    }

    pub fn buffer_ms(&self) -> Ms {
        self.min_booking_buffer_minutes * MINUTE_MS
    }

    pub fn reminder_lead_ms(&self) -> Ms {
        self.reminder_lead_minutes * MINUTE_MS
    }

    pub fn prayer_half_width_ms(&self) -> Ms {
        self.prayer_block_half_width_minutes * MINUTE_MS
    }
}
