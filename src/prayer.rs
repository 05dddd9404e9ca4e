//! Prayer-window blocking.
//!
//! Daily prayer instants come from an external timetable provider and are
//! cached persistently per date. Each instant blocks a half-open window
//! around it; candidates whose instant falls inside a window are removed.
//! The provider is strictly advisory: any failure degrades to no filtering
//! for that date and never blocks booking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Days, FixedOffset, NaiveDate};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::clock::{local_date, ms_at};
use crate::config::BookingConfig;
use crate::engine::Engine;
use crate::model::{Ms, Span};
use crate::observability;

#[derive(Debug)]
pub enum ProviderError {
    Http(String),
    Malformed(&'static str),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Http(e) => write!(f, "timetable fetch failed: {e}"),
            ProviderError::Malformed(msg) => write!(f, "timetable response malformed: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// External daily timetable: up to five named instants per date, in the
/// operating timezone.
#[async_trait]
pub trait PrayerTimesProvider: Send + Sync {
    async fn fetch(&self, date: NaiveDate) -> Result<Vec<Ms>, ProviderError>;
}

const ALADHAN_BASE: &str = "https://api.aladhan.com";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the AlAdhan timings API.
pub struct AladhanClient {
    http: reqwest::Client,
    base_url: String,
    latitude: f64,
    longitude: f64,
    tz: FixedOffset,
}

#[derive(Deserialize)]
struct TimingsResponse {
    code: i64,
    data: Option<TimingsData>,
}

#[derive(Deserialize)]
struct TimingsData {
    timings: Timings,
}

#[derive(Deserialize)]
struct Timings {
    #[serde(rename = "Fajr")]
    fajr: String,
    #[serde(rename = "Dhuhr")]
    dhuhr: String,
    #[serde(rename = "Asr")]
    asr: String,
    #[serde(rename = "Maghrib")]
    maghrib: String,
    #[serde(rename = "Isha")]
    isha: String,
}

impl AladhanClient {
    pub fn new(cfg: &BookingConfig) -> Self {
        Self::with_base_url(cfg, ALADHAN_BASE)
    }

    pub fn with_base_url(cfg: &BookingConfig, base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            latitude: cfg.latitude,
            longitude: cfg.longitude,
            tz: cfg.tz(),
        }
    }
}

/// Parse a provider `HH:MM` timing (possibly suffixed, e.g. "04:36 (WIB)")
/// into an instant on `date`.
fn parse_timing(raw: &str, date: NaiveDate, tz: FixedOffset) -> Result<Ms, ProviderError> {
    let hhmm = raw
        .split_whitespace()
        .next()
        .ok_or(ProviderError::Malformed("empty timing"))?;
    let (h, m) = hhmm
        .split_once(':')
        .ok_or(ProviderError::Malformed("timing not HH:MM"))?;
    let hour: u32 = h
        .parse()
        .map_err(|_| ProviderError::Malformed("bad hour"))?;
    let minute: u32 = m
        .parse()
        .map_err(|_| ProviderError::Malformed("bad minute"))?;
    if hour > 23 || minute > 59 {
        return Err(ProviderError::Malformed("timing out of range"));
    }
    Ok(ms_at(date, hour, minute, tz))
}

#[async_trait]
impl PrayerTimesProvider for AladhanClient {
    async fn fetch(&self, date: NaiveDate) -> Result<Vec<Ms>, ProviderError> {
        // The API wants DD-MM-YYYY
        let url = format!(
            "{}/v1/timings/{:02}-{:02}-{}",
            self.base_url,
            date.day(),
            date.month(),
            date.year()
        );
        let response = self
            .http
            .get(&url)
            .query(&[
                ("latitude", self.latitude.to_string()),
                ("longitude", self.longitude.to_string()),
                ("method", "2".to_string()),
            ])
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let body: TimingsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        if body.code != 200 {
            return Err(ProviderError::Malformed("provider status not OK"));
        }
        let data = body.data.ok_or(ProviderError::Malformed("missing data"))?;

        let t = data.timings;
        let mut instants = Vec::with_capacity(5);
        for raw in [&t.fajr, &t.dhuhr, &t.asr, &t.maghrib, &t.isha] {
            instants.push(parse_timing(raw, date, self.tz)?);
        }
        Ok(instants)
    }
}

/// Removes candidates that fall inside a prayer window.
///
/// Lookup order per date: persistent engine cache, then provider (cached
/// on success), then fail-open. One invocation resolves each date at most
/// once via an in-call memo.
pub struct PrayerBlocker {
    engine: Arc<Engine>,
    provider: Arc<dyn PrayerTimesProvider>,
}

impl PrayerBlocker {
    pub fn new(engine: Arc<Engine>, provider: Arc<dyn PrayerTimesProvider>) -> Self {
        Self { engine, provider }
    }

    async fn cached_or_fetch(&self, date: NaiveDate) -> Option<Vec<Ms>> {
        if let Some(instants) = self.engine.prayer_times_for(date) {
            metrics::counter!(observability::PRAYER_CACHE_HITS_TOTAL).increment(1);
            return Some(instants);
        }
        match self.provider.fetch(date).await {
            Ok(instants) => {
                metrics::counter!(observability::PRAYER_FETCH_TOTAL, "result" => "ok")
                    .increment(1);
                if let Err(e) = self.engine.save_prayer_times(date, instants.clone()).await {
                    warn!("could not cache prayer times for {date}: {e}");
                }
                Some(instants)
            }
            Err(e) => {
                metrics::counter!(observability::PRAYER_FETCH_TOTAL, "result" => "error")
                    .increment(1);
                warn!("prayer times unavailable for {date}: {e} — not blocking");
                None
            }
        }
    }

    /// Blocked windows `[p−Δ, p+Δ)` for one date. Empty on provider
    /// failure or zero half-width.
    pub async fn windows_for_date(&self, date: NaiveDate) -> Vec<Span> {
        let half = self.engine.config.prayer_half_width_ms();
        if half == 0 {
            return Vec::new();
        }
        match self.cached_or_fetch(date).await {
            Some(instants) => instants
                .iter()
                .map(|p| Span::new(p - half, p + half))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Remove candidates whose instant falls in any blocked window of its
    /// date. Output is ascending.
    pub async fn filter_candidates(&self, candidates: &[Ms]) -> Vec<Ms> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let tz = self.engine.config.tz();
        let mut memo: HashMap<NaiveDate, Vec<Span>> = HashMap::new();
        let mut out = Vec::with_capacity(candidates.len());
        for &t in candidates {
            let date = local_date(t, tz);
            if !memo.contains_key(&date) {
                let windows = self.windows_for_date(date).await;
                memo.insert(date, windows);
            }
            if !memo[&date].iter().any(|w| w.contains_instant(t)) {
                out.push(t);
            }
        }
        out.sort_unstable();
        out
    }

    /// Does a single instant fall in a prayer window?
    pub async fn is_blocked(&self, t: Ms) -> bool {
        let date = local_date(t, self.engine.config.tz());
        self.windows_for_date(date)
            .await
            .iter()
            .any(|w| w.contains_instant(t))
    }

    /// The full candidate pipeline for a date: slot grid, blackout
    /// short-circuit, prayer filtering.
    pub async fn bookable_slots(&self, date: NaiveDate) -> Vec<Ms> {
        let candidates: Vec<Ms> = self.engine.generate_slots(date).collect();
        self.filter_candidates(&candidates).await
    }

    /// Fill the cache for the rolling horizon and evict entries dated
    /// before yesterday. Returns how many horizon dates are cached after
    /// the pass.
    pub async fn prefetch(&self) -> usize {
        let cfg = &self.engine.config;
        let today = local_date(self.engine.now_ms(), cfg.tz());
        let mut cached = 0usize;

        for i in 0..cfg.prefetch_horizon_days {
            let Some(date) = today.checked_add_days(Days::new(i as u64)) else {
                break;
            };
            if self.engine.prayer_times_for(date).is_some() {
                cached += 1;
                continue;
            }
            match self.provider.fetch(date).await {
                Ok(instants) => {
                    metrics::counter!(observability::PRAYER_FETCH_TOTAL, "result" => "ok")
                        .increment(1);
                    match self.engine.save_prayer_times(date, instants).await {
                        Ok(()) => cached += 1,
                        Err(e) => warn!("could not cache prayer times for {date}: {e}"),
                    }
                }
                Err(e) => {
                    metrics::counter!(observability::PRAYER_FETCH_TOTAL, "result" => "error")
                        .increment(1);
                    debug!("prefetch miss for {date}: {e}");
                }
            }
        }

        if let Some(yesterday) = today.pred_opt() {
            match self.engine.prune_prayer_cache(yesterday).await {
                Ok(0) => {}
                Ok(n) => info!("evicted {n} stale prayer cache entries"),
                Err(e) => warn!("prayer cache eviction failed: {e}"),
            }
        }

        cached
    }
}

/// Background sweep keeping the prayer cache warm for the horizon.
pub async fn run_prayer_prefetch(blocker: Arc<PrayerBlocker>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let cached = blocker.prefetch().await;
        debug!("prayer prefetch pass complete: {cached} dates cached");
    }
}
