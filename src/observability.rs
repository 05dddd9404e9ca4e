use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings committed.
pub const BOOKINGS_COMMITTED_TOTAL: &str = "jadwal_bookings_committed_total";

/// Counter: commit attempts rejected by the conflict check.
pub const BOOKING_CONFLICTS_TOTAL: &str = "jadwal_booking_conflicts_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "jadwal_bookings_cancelled_total";

/// Counter: prayer timetable fetches. Labels: result (ok | error).
pub const PRAYER_FETCH_TOTAL: &str = "jadwal_prayer_fetch_total";

/// Counter: prayer lookups served from the persistent cache.
pub const PRAYER_CACHE_HITS_TOTAL: &str = "jadwal_prayer_cache_hits_total";

/// Counter: reminder jobs registered.
pub const REMINDERS_SCHEDULED_TOTAL: &str = "jadwal_reminders_scheduled_total";

/// Counter: reminder jobs that fired and delivered.
pub const REMINDERS_FIRED_TOTAL: &str = "jadwal_reminders_fired_total";

/// Counter: reminders suppressed (fire time already past, or booking gone
/// by the time the job ran).
pub const REMINDERS_SUPPRESSED_TOTAL: &str = "jadwal_reminders_suppressed_total";

// ── USE metrics (background work) ───────────────────────────────

/// Counter: activation sweep transitions. Labels: direction.
pub const ACTIVATION_TRANSITIONS_TOTAL: &str = "jadwal_activation_transitions_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "jadwal_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "jadwal_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Install the default tracing subscriber, filtered by `RUST_LOG`.
/// For consumers that don't bring their own subscriber.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
