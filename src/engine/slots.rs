use chrono::{Days, NaiveDate};

use crate::clock::{local_date, ms_at, weekday_index};
use crate::config::BookingConfig;
use crate::model::{Ms, Span};

use super::Engine;

/// Lazy, restartable, finite sequence of candidate start instants for one
/// date. Deterministic given `(config, date, now)`.
///
/// The grid steps by `interval_minutes` from `start_hour`; instants at or
/// past `end_hour` are never produced; instants whose hour falls in the
/// break are skipped; on the current date, instants must lie strictly
/// after `now + min_booking_buffer_minutes`.
#[derive(Debug, Clone)]
pub struct SlotIter {
    cur: Ms,
    first: Ms,
    end: Ms,
    step: Ms,
    break_window: Option<Span>,
    min_exclusive: Ms,
}

impl SlotIter {
    fn empty() -> Self {
        Self {
            cur: 0,
            first: 0,
            end: 0,
            step: 1,
            break_window: None,
            min_exclusive: Ms::MIN,
        }
    }

    /// Build the candidate grid for `date`. A date before today (in the
    /// configured timezone) yields an empty sequence.
    pub fn for_date(cfg: &BookingConfig, date: NaiveDate, now: Ms) -> Self {
        let tz = cfg.tz();
        let today = local_date(now, tz);
        if date < today {
            return Self::empty();
        }

        let first = ms_at(date, cfg.start_hour, 0, tz);
        let end = ms_at(date, cfg.end_hour, 0, tz);
        // hour(t) ∈ [break_start, break_end) ⇔ t ∈ [break_start:00, break_end:00)
        // for instants on this date.
        let break_window = (cfg.break_start_hour < cfg.break_end_hour).then(|| {
            Span::new(
                ms_at(date, cfg.break_start_hour, 0, tz),
                ms_at(date, cfg.break_end_hour, 0, tz),
            )
        });
        let min_exclusive = if date == today {
            now + cfg.buffer_ms()
        } else {
            Ms::MIN
        };

        Self {
            cur: first,
            first,
            end,
            step: cfg.interval_ms(),
            break_window,
            min_exclusive,
        }
    }

    /// Reset to the first candidate.
    pub fn rewind(&mut self) {
        self.cur = self.first;
    }
}

impl Iterator for SlotIter {
    type Item = Ms;

    fn next(&mut self) -> Option<Ms> {
        while self.cur < self.end {
            let t = self.cur;
            self.cur += self.step;
            if let Some(w) = self.break_window
                && w.contains_instant(t)
            {
                continue;
            }
            if t <= self.min_exclusive {
                continue;
            }
            return Some(t);
        }
        None
    }
}

impl Engine {
    /// Whole-date closure: the weekday recurs in the weekly rules, or the
    /// date itself is listed. Evaluated once per date, not per slot.
    pub fn is_blackout(&self, date: NaiveDate) -> bool {
        self.blackout_weekly.contains(&weekday_index(date))
            || self.blackout_dates.contains(&date)
    }

    /// Candidate start instants for a date. Blackout dates and dates past
    /// the booking horizon (`max_days_ahead`) short-circuit to an empty
    /// sequence; prayer windows are removed downstream by the blocker.
    pub fn generate_slots(&self, date: NaiveDate) -> SlotIter {
        if self.is_blackout(date) {
            return SlotIter::empty();
        }
        let now = self.now_ms();
        let today = local_date(now, self.config.tz());
        let horizon = today.checked_add_days(Days::new(self.config.max_days_ahead as u64));
        if horizon.is_some_and(|h| date > h) {
            return SlotIter::empty();
        }
        SlotIter::for_date(&self.config, date, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::to_local;

    fn cfg() -> BookingConfig {
        BookingConfig::default()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hhmm(cfg: &BookingConfig, ms: Ms) -> String {
        to_local(ms, cfg.tz()).format("%H:%M").to_string()
    }

    #[test]
    fn full_day_grid_skips_break() {
        let cfg = cfg();
        let target = date(2025, 3, 11); // Tuesday
        // "now" is well before the target date
        let now = ms_at(date(2025, 3, 1), 12, 0, cfg.tz());

        let slots: Vec<String> = SlotIter::for_date(&cfg, target, now)
            .map(|t| hhmm(&cfg, t))
            .collect();
        assert_eq!(
            slots,
            vec![
                "09:00", "09:40", "10:20", "11:00", "11:40", // 12:20 in break
                "13:00", "13:40", "14:20", "15:00", "15:40", "16:20", "17:00", "17:40",
            ]
        );
    }

    #[test]
    fn past_date_is_empty() {
        let cfg = cfg();
        let now = ms_at(date(2025, 3, 11), 8, 0, cfg.tz());
        let slots: Vec<Ms> = SlotIter::for_date(&cfg, date(2025, 3, 10), now).collect();
        assert!(slots.is_empty());
    }

    #[test]
    fn today_respects_booking_buffer() {
        let cfg = cfg();
        let today = date(2025, 3, 11);
        // 10:17 + 5min buffer = 10:22 ⇒ first slot is 11:00
        let now = ms_at(today, 10, 17, cfg.tz());
        let first = SlotIter::for_date(&cfg, today, now).next().unwrap();
        assert_eq!(hhmm(&cfg, first), "11:00");
    }

    #[test]
    fn buffer_boundary_is_exclusive() {
        let cfg = cfg();
        let today = date(2025, 3, 11);
        // now + buffer lands exactly on 10:20 ⇒ 10:20 itself is excluded
        let now = ms_at(today, 10, 15, cfg.tz());
        let first = SlotIter::for_date(&cfg, today, now).next().unwrap();
        assert_eq!(hhmm(&cfg, first), "11:00");
        // one minute earlier and 10:20 qualifies
        let now = ms_at(today, 10, 14, cfg.tz());
        let first = SlotIter::for_date(&cfg, today, now).next().unwrap();
        assert_eq!(hhmm(&cfg, first), "10:20");
    }

    #[test]
    fn today_late_evening_yields_nothing() {
        let cfg = cfg();
        let today = date(2025, 3, 11);
        let now = ms_at(today, 17, 50, cfg.tz());
        assert_eq!(SlotIter::for_date(&cfg, today, now).count(), 0);
    }

    #[test]
    fn rewind_restarts_the_sequence() {
        let cfg = cfg();
        let target = date(2025, 3, 11);
        let now = ms_at(date(2025, 3, 1), 12, 0, cfg.tz());

        let mut iter = SlotIter::for_date(&cfg, target, now);
        let first_pass: Vec<Ms> = iter.by_ref().collect();
        iter.rewind();
        let second_pass: Vec<Ms> = iter.collect();
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn grid_is_ascending_and_stepped() {
        let cfg = cfg();
        let target = date(2025, 3, 11);
        let now = ms_at(date(2025, 3, 1), 12, 0, cfg.tz());

        let slots: Vec<Ms> = SlotIter::for_date(&cfg, target, now).collect();
        for pair in slots.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!((pair[1] - pair[0]) % cfg.interval_ms(), 0);
        }
    }

    #[test]
    fn no_break_configured() {
        let cfg = BookingConfig {
            break_start_hour: 0,
            break_end_hour: 0,
            start_hour: 9,
            end_hour: 11,
            interval_minutes: 30,
            ..Default::default()
        };
        let target = date(2025, 3, 11);
        let now = ms_at(date(2025, 3, 1), 12, 0, cfg.tz());
        let slots: Vec<String> = SlotIter::for_date(&cfg, target, now)
            .map(|t| hhmm(&cfg, t))
            .collect();
        assert_eq!(slots, vec!["09:00", "09:30", "10:00", "10:30"]);
    }
}
