use super::*;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::{ManualClock, ms_at, to_local};
use crate::model::MINUTE_MS;

const M: Ms = MINUTE_MS;
const H: Ms = 60 * MINUTE_MS;
const DAY: Ms = 24 * H;

// An arbitrary fixed instant (2023-11-14T22:13:20Z) for tests that don't
// care about wall-clock alignment.
const T0: Ms = 1_700_000_000_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("jadwal_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn setup_at(name: &str, now: Ms) -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(now));
    let engine = Engine::new(
        test_wal_path(name),
        BookingConfig::default(),
        clock.clone(),
        Arc::new(NotifyHub::new()),
    )
    .unwrap();
    (engine, clock)
}

fn setup(name: &str) -> (Engine, Arc<ManualClock>) {
    setup_at(name, T0)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

async fn commit(engine: &Engine, rid: Ulid, start: Ms) -> Result<BookingInfo, EngineError> {
    engine
        .commit_booking(rid, 42, "Budi Santoso", "any", "Jl. Melati 5", start, 40)
        .await
}

// ── Resource administration ──────────────────────────────

#[tokio::test]
async fn create_and_list_resources() {
    let (engine, _) = setup("create_list.wal");
    engine.create_resource("Tyas", "female").await.unwrap();
    engine.create_resource("Irfan", "male").await.unwrap();

    let all = engine.list_resources(false).await;
    assert_eq!(all.len(), 2);
    // Sorted by name
    assert_eq!(all[0].name, "Irfan");
    assert_eq!(all[1].name, "Tyas");
    assert!(all.iter().all(|r| r.active && r.inactive.is_none()));
}

#[tokio::test]
async fn active_only_listing_skips_inactive() {
    let (engine, _) = setup("active_only.wal");
    let a = engine.create_resource("Ana", "female").await.unwrap();
    engine.create_resource("Marsudi", "male").await.unwrap();

    engine.toggle_active(a.id).await.unwrap();
    let active = engine.list_resources(true).await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name, "Marsudi");
}

#[tokio::test]
async fn resource_name_validation() {
    let (engine, _) = setup("name_validation.wal");
    assert!(matches!(
        engine.create_resource("A", "any").await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.create_resource("1234", "any").await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.create_resource("Ana", "").await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn update_resource_changes_name_and_category() {
    let (engine, _) = setup("update_resource.wal");
    let r = engine.create_resource("Ana", "female").await.unwrap();
    engine.update_resource(r.id, "Ana Lestari", "female").await.unwrap();
    let info = engine.get_resource_info(r.id).await.unwrap();
    assert_eq!(info.name, "Ana Lestari");
}

#[tokio::test]
async fn delete_resource_refused_while_booked() {
    let (engine, _) = setup("delete_in_use.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();
    commit(&engine, r.id, T0 + H).await.unwrap();

    assert!(matches!(
        engine.delete_resource(r.id).await,
        Err(EngineError::ResourceInUse(_))
    ));

    // Unreferenced resources delete fine
    let other = engine.create_resource("Marsudi", "any").await.unwrap();
    engine.delete_resource(other.id).await.unwrap();
    assert!(matches!(
        engine.get_resource_info(other.id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn unknown_resource_is_not_found() {
    let (engine, _) = setup("unknown_resource.wal");
    let ghost = Ulid::new();
    assert!(matches!(
        engine.get_resource_info(ghost).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.is_free(ghost, T0, 40).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.toggle_active(ghost).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Availability and commit ──────────────────────────────

#[tokio::test]
async fn committed_span_blocks_and_adjacent_is_free() {
    let (engine, _) = setup("commit_blocks.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();

    let start = T0 + 2 * H;
    commit(&engine, r.id, start).await.unwrap();

    assert!(!engine.is_free(r.id, start, 40).await.unwrap());
    // 20 minutes in, still overlapping
    assert!(!engine.is_free(r.id, start + 20 * M, 40).await.unwrap());
    // Back-to-back session is fine (half-open)
    assert!(engine.is_free(r.id, start + 40 * M, 40).await.unwrap());
    // Ending exactly at the booking start is fine too
    assert!(engine.is_free(r.id, start - 40 * M, 40).await.unwrap());
}

#[tokio::test]
async fn overlapping_commit_conflicts() {
    let (engine, _) = setup("commit_conflict.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();

    let start = T0 + 2 * H;
    let first = commit(&engine, r.id, start).await.unwrap();
    let err = commit(&engine, r.id, start + 20 * M).await.unwrap_err();
    match err {
        EngineError::Conflict(id) => assert_eq!(id, first.id),
        other => panic!("expected conflict, got {other}"),
    }
}

#[tokio::test]
async fn cancellation_frees_the_span() {
    let (engine, _) = setup("cancel_frees.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();

    let start = T0 + 2 * H;
    let booking = commit(&engine, r.id, start).await.unwrap();
    engine.cancel_booking(booking.id).await.unwrap();

    assert!(engine.is_free(r.id, start, 40).await.unwrap());
    // The record is retained, not deleted
    let stored = engine.get_booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Cancelled);

    // And the span can be taken again
    commit(&engine, r.id, start).await.unwrap();
}

#[tokio::test]
async fn cancel_twice_is_noop() {
    let (engine, _) = setup("cancel_twice.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();
    let booking = commit(&engine, r.id, T0 + H).await.unwrap();

    let first = engine.cancel_booking(booking.id).await.unwrap();
    assert_eq!(first.status, BookingStatus::Cancelled);
    let second = engine.cancel_booking(booking.id).await.unwrap();
    assert_eq!(second.status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn complete_requires_confirmed() {
    let (engine, _) = setup("complete.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();
    let booking = commit(&engine, r.id, T0 + H).await.unwrap();

    let done = engine.complete_booking(booking.id).await.unwrap();
    assert_eq!(done.status, BookingStatus::Completed);
    assert!(matches!(
        engine.complete_booking(booking.id).await,
        Err(EngineError::Validation(_))
    ));
    // Completed sessions no longer occupy the resource
    assert!(engine.is_free(r.id, T0 + H, 40).await.unwrap());
}

#[tokio::test]
async fn inactivity_window_blocks_availability() {
    let (engine, _) = setup("window_blocks.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();
    engine
        .schedule_inactivity(r.id, T0 + 2 * H, T0 + 4 * H)
        .await
        .unwrap();

    assert!(!engine.is_free(r.id, T0 + 3 * H, 40).await.unwrap());
    // Adjacent to the window end
    assert!(engine.is_free(r.id, T0 + 4 * H, 40).await.unwrap());

    let err = commit(&engine, r.id, T0 + 3 * H).await.unwrap_err();
    match err {
        EngineError::Conflict(id) => assert_eq!(id, r.id),
        other => panic!("expected conflict, got {other}"),
    }
}

#[tokio::test]
async fn concurrent_commits_serialize_per_resource() {
    let (engine, _) = setup("concurrent.wal");
    let engine = Arc::new(engine);
    let r = engine.create_resource("Ana", "any").await.unwrap();

    let start = T0 + 2 * H;
    let a = {
        let engine = engine.clone();
        let rid = r.id;
        tokio::spawn(async move { commit(&engine, rid, start).await })
    };
    let b = {
        let engine = engine.clone();
        let rid = r.id;
        tokio::spawn(async move { commit(&engine, rid, start + 20 * M).await })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert!(
        a.is_ok() != b.is_ok(),
        "exactly one of two overlapping commits must win: {a:?} / {b:?}"
    );

    let confirmed = engine
        .bookings_for_resource(r.id, Some(BookingStatus::Confirmed))
        .await;
    assert_eq!(confirmed.len(), 1);
}

#[tokio::test]
async fn confirmed_bookings_never_overlap() {
    let (engine, _) = setup("no_overlap_invariant.wal");
    let engine = Arc::new(engine);
    let r = engine.create_resource("Ana", "any").await.unwrap();

    // Hammer the same morning from several tasks
    let mut handles = Vec::new();
    for i in 0..12i64 {
        let engine = engine.clone();
        let rid = r.id;
        handles.push(tokio::spawn(async move {
            let start = T0 + (i % 6) * 20 * M;
            let _ = commit(&engine, rid, start).await;
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let confirmed = engine
        .bookings_for_resource(r.id, Some(BookingStatus::Confirmed))
        .await;
    for (i, a) in confirmed.iter().enumerate() {
        for b in confirmed.iter().skip(i + 1) {
            assert!(
                !a.span().overlaps(&b.span()),
                "overlap between {a:?} and {b:?}"
            );
        }
    }
}

// ── Reschedule and edits ─────────────────────────────────

#[tokio::test]
async fn reschedule_within_resource() {
    let (engine, _) = setup("resched_same.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();
    let booking = commit(&engine, r.id, T0 + H).await.unwrap();

    let moved = engine
        .reschedule_booking(booking.id, r.id, T0 + 3 * H, 40)
        .await
        .unwrap();
    assert_eq!(moved.start, T0 + 3 * H);
    assert!(engine.is_free(r.id, T0 + H, 40).await.unwrap());
    assert!(!engine.is_free(r.id, T0 + 3 * H, 40).await.unwrap());
}

#[tokio::test]
async fn reschedule_onto_own_overlap_is_allowed() {
    let (engine, _) = setup("resched_self_overlap.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();
    let booking = commit(&engine, r.id, T0 + H).await.unwrap();

    // Shift by 20 minutes — overlaps only itself
    let moved = engine
        .reschedule_booking(booking.id, r.id, T0 + H + 20 * M, 40)
        .await
        .unwrap();
    assert_eq!(moved.start, T0 + H + 20 * M);
}

#[tokio::test]
async fn reschedule_across_resources() {
    let (engine, _) = setup("resched_cross.wal");
    let a = engine.create_resource("Ana", "any").await.unwrap();
    let b = engine.create_resource("Marsudi", "any").await.unwrap();
    let booking = commit(&engine, a.id, T0 + H).await.unwrap();

    let moved = engine
        .reschedule_booking(booking.id, b.id, T0 + 2 * H, 40)
        .await
        .unwrap();
    assert_eq!(moved.resource_id, b.id);

    assert!(engine.is_free(a.id, T0 + H, 40).await.unwrap());
    assert!(!engine.is_free(b.id, T0 + 2 * H, 40).await.unwrap());
    // Index follows the move
    let stored = engine.get_booking(booking.id).await.unwrap();
    assert_eq!(stored.resource_id, b.id);
}

#[tokio::test]
async fn reschedule_conflict_on_target() {
    let (engine, _) = setup("resched_conflict.wal");
    let a = engine.create_resource("Ana", "any").await.unwrap();
    let b = engine.create_resource("Marsudi", "any").await.unwrap();
    let victim = commit(&engine, b.id, T0 + 2 * H).await.unwrap();
    let booking = commit(&engine, a.id, T0 + H).await.unwrap();

    let err = engine
        .reschedule_booking(booking.id, b.id, T0 + 2 * H + 20 * M, 40)
        .await
        .unwrap_err();
    match err {
        EngineError::Conflict(id) => assert_eq!(id, victim.id),
        other => panic!("expected conflict, got {other}"),
    }
    // Nothing moved
    let stored = engine.get_booking(booking.id).await.unwrap();
    assert_eq!(stored.resource_id, a.id);
    assert_eq!(stored.start, T0 + H);
}

#[tokio::test]
async fn edit_subject_fields() {
    let (engine, _) = setup("edit_subject.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();
    let booking = commit(&engine, r.id, T0 + H).await.unwrap();

    let edited = engine
        .edit_booking_subject(booking.id, Some("Citra Ayu"), None)
        .await
        .unwrap();
    assert_eq!(edited.subject_name, "Citra Ayu");
    assert_eq!(edited.subject_address, "Jl. Melati 5"); // untouched
}

#[tokio::test]
async fn reminder_job_link_roundtrip() {
    let (engine, _) = setup("job_link.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();
    let booking = commit(&engine, r.id, T0 + H).await.unwrap();

    let job = Ulid::new();
    engine.set_reminder_job(booking.id, Some(job)).await.unwrap();
    assert_eq!(
        engine.get_booking(booking.id).await.unwrap().reminder_job_id,
        Some(job)
    );
    engine.set_reminder_job(booking.id, None).await.unwrap();
    assert_eq!(
        engine.get_booking(booking.id).await.unwrap().reminder_job_id,
        None
    );
}

// ── Booking queries ──────────────────────────────────────

#[tokio::test]
async fn upcoming_excludes_past_and_non_confirmed() {
    let (engine, clock) = setup("upcoming.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();

    let past = commit(&engine, r.id, T0 + H).await.unwrap();
    let cancelled = commit(&engine, r.id, T0 + 3 * H).await.unwrap();
    engine.cancel_booking(cancelled.id).await.unwrap();
    let future = commit(&engine, r.id, T0 + 5 * H).await.unwrap();

    clock.set(T0 + 2 * H); // `past` has started already
    let upcoming = engine.upcoming_bookings().await;
    assert_eq!(upcoming.len(), 1);
    assert_eq!(upcoming[0].id, future.id);
    let _ = past;
}

#[tokio::test]
async fn requester_history_is_most_recent_first() {
    let (engine, _) = setup("history.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();
    let early = commit(&engine, r.id, T0 + H).await.unwrap();
    let late = commit(&engine, r.id, T0 + 5 * H).await.unwrap();
    engine
        .commit_booking(r.id, 99, "Dewi Sartika", "any", "", T0 + 3 * H, 40)
        .await
        .unwrap();

    let history = engine.bookings_for_requester(42).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, late.id);
    assert_eq!(history[1].id, early.id);
}

#[tokio::test]
async fn free_resources_filter_by_category_and_availability() {
    let (engine, _) = setup("free_resources.wal");
    let f1 = engine.create_resource("Nurul", "female").await.unwrap();
    let f2 = engine.create_resource("Tyas", "female").await.unwrap();
    let m1 = engine.create_resource("Irfan", "male").await.unwrap();

    commit(&engine, f1.id, T0 + H).await.unwrap();
    engine.toggle_active(m1.id).await.unwrap(); // inactive, never listed

    let free = engine
        .free_resources_at(T0 + H, 40, Some("female"))
        .await
        .unwrap();
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].id, f2.id);

    let free_any = engine.free_resources_at(T0 + H, 40, None).await.unwrap();
    assert_eq!(free_any.len(), 1); // m1 inactive, f1 busy
}

// ── Slot generation and blackouts ────────────────────────

#[tokio::test]
async fn blackout_date_short_circuits_generation() {
    let target = date(2025, 3, 11);
    let cfg = BookingConfig::default();
    let now = ms_at(date(2025, 3, 1), 8, 0, cfg.tz());
    let (engine, _) = setup_at("blackout_date.wal", now);

    assert!(engine.generate_slots(target).count() > 0);

    engine.add_blackout_date(target).await.unwrap();
    assert!(engine.is_blackout(target));
    assert_eq!(engine.generate_slots(target).count(), 0);

    engine.remove_blackout_date(target).await.unwrap();
    assert!(engine.generate_slots(target).count() > 0);
}

#[tokio::test]
async fn blackout_weekday_recurs() {
    let cfg = BookingConfig::default();
    let now = ms_at(date(2025, 3, 1), 8, 0, cfg.tz());
    let (engine, _) = setup_at("blackout_weekday.wal", now);

    // Wednesday off, recurring
    engine.add_blackout_weekday(2).await.unwrap();
    assert_eq!(engine.generate_slots(date(2025, 3, 12)).count(), 0);
    assert_eq!(engine.generate_slots(date(2025, 3, 19)).count(), 0);
    assert!(engine.generate_slots(date(2025, 3, 13)).count() > 0);

    assert!(matches!(
        engine.add_blackout_weekday(7).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn working_day_grid_matches_expected_times() {
    let cfg = BookingConfig::default();
    let now = ms_at(date(2025, 3, 1), 8, 0, cfg.tz());
    let (engine, _) = setup_at("grid.wal", now);

    let slots: Vec<String> = engine
        .generate_slots(date(2025, 3, 11))
        .map(|t| to_local(t, cfg.tz()).format("%H:%M").to_string())
        .collect();
    assert_eq!(
        slots,
        vec![
            "09:00", "09:40", "10:20", "11:00", "11:40", // 12:20 falls in the break
            "13:00", "13:40", "14:20", "15:00", "15:40", "16:20", "17:00", "17:40",
        ]
    );
}

#[tokio::test]
async fn dates_past_the_booking_horizon_yield_no_slots() {
    let cfg = BookingConfig::default();
    let now = ms_at(date(2025, 3, 1), 8, 0, cfg.tz());
    let (engine, _) = setup_at("horizon.wal", now);

    // 30 days ahead is the last bookable date
    assert!(engine.generate_slots(date(2025, 3, 31)).count() > 0);
    assert_eq!(engine.generate_slots(date(2025, 4, 1)).count(), 0);
}

#[tokio::test]
async fn past_date_yields_no_slots() {
    let cfg = BookingConfig::default();
    let now = ms_at(date(2025, 3, 11), 8, 0, cfg.tz());
    let (engine, _) = setup_at("past_date.wal", now);
    assert_eq!(engine.generate_slots(date(2025, 3, 10)).count(), 0);
}

#[tokio::test]
async fn todays_slots_respect_buffer() {
    let cfg = BookingConfig::default();
    let today = date(2025, 3, 11);
    let now = ms_at(today, 10, 17, cfg.tz());
    let (engine, _) = setup_at("today_buffer.wal", now);

    let first = engine.generate_slots(today).next().unwrap();
    assert_eq!(to_local(first, cfg.tz()).format("%H:%M").to_string(), "11:00");
}

// ── Waitlist ─────────────────────────────────────────────

#[tokio::test]
async fn waitlist_lifecycle() {
    let (engine, clock) = setup("waitlist.wal");
    let d = date(2025, 4, 1);

    let first = engine
        .join_waitlist(101, "Citra Ayu", Some("+62 812-3456-789"), "female", Some(d))
        .await
        .unwrap();
    clock.advance(M);
    let second = engine
        .join_waitlist(102, "Dewi Sartika", None, "female", None)
        .await
        .unwrap();

    let listed = engine.list_waitlist();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, first.id); // oldest first
    assert_eq!(listed[1].id, second.id);

    let by_date = engine.waitlist_for_date(d);
    assert_eq!(by_date.len(), 1);
    assert_eq!(by_date[0].id, first.id);

    let fetched = engine.get_waitlist_entry(first.id).unwrap();
    assert_eq!(fetched.contact_id, 101);

    let removed = engine.remove_waitlist_entry(first.id).await.unwrap();
    assert_eq!(removed.id, first.id);
    assert!(matches!(
        engine.get_waitlist_entry(first.id),
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.remove_waitlist_entry(first.id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn waitlist_phone_is_validated() {
    let (engine, _) = setup("waitlist_phone.wal");
    assert!(matches!(
        engine
            .join_waitlist(101, "Citra Ayu", Some("123"), "female", None)
            .await,
        Err(EngineError::Validation(_))
    ));
}

// ── Inactivity scheduling ────────────────────────────────

#[tokio::test]
async fn schedule_inactivity_validates_window() {
    let (engine, _) = setup("bad_window.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();
    assert!(matches!(
        engine.schedule_inactivity(r.id, T0 + H, T0 + H).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.schedule_inactivity(r.id, T0 + 2 * H, T0 + H).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn future_window_leaves_resource_active() {
    let (engine, _) = setup("future_window.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();
    engine
        .schedule_inactivity(r.id, T0 + H, T0 + DAY)
        .await
        .unwrap();
    let info = engine.get_resource_info(r.id).await.unwrap();
    assert!(info.active);
    assert_eq!(info.inactive, Some(Span::new(T0 + H, T0 + DAY)));
}

#[tokio::test]
async fn started_window_deactivates_immediately() {
    let (engine, _) = setup("started_window.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();
    // "Inactive now for 3 days"
    engine
        .schedule_inactivity(r.id, T0, T0 + 3 * DAY)
        .await
        .unwrap();
    let info = engine.get_resource_info(r.id).await.unwrap();
    assert!(!info.active);
    assert_eq!(info.inactive, Some(Span::new(T0, T0 + 3 * DAY)));
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn cancellation_is_broadcast_for_the_waitlist_hook() {
    let (engine, _) = setup("notify_cancel.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();
    let booking = commit(&engine, r.id, T0 + H).await.unwrap();

    let mut rx = engine.notify.subscribe(r.id);
    engine.cancel_booking(booking.id).await.unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(
        event,
        Event::BookingStatusChanged {
            id: booking.id,
            status: BookingStatus::Cancelled,
        }
    );
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn restart_replays_full_state() {
    let path = test_wal_path("restart_replay.wal");
    let clock = Arc::new(ManualClock::new(T0));
    let d = date(2025, 4, 1);

    let (rid, booking_id, waitlist_id);
    {
        let engine = Engine::new(
            path.clone(),
            BookingConfig::default(),
            clock.clone(),
            Arc::new(NotifyHub::new()),
        )
        .unwrap();
        let r = engine.create_resource("Ana", "female").await.unwrap();
        rid = r.id;
        let booking = commit(&engine, rid, T0 + 2 * H).await.unwrap();
        booking_id = booking.id;
        engine
            .schedule_inactivity(rid, T0 + DAY, T0 + 2 * DAY)
            .await
            .unwrap();
        let entry = engine
            .join_waitlist(101, "Citra Ayu", None, "female", Some(d))
            .await
            .unwrap();
        waitlist_id = entry.id;
        engine.add_blackout_weekday(2).await.unwrap();
        engine.add_blackout_date(d).await.unwrap();
        engine
            .save_prayer_times(d, vec![T0 + 3 * H])
            .await
            .unwrap();
    }

    let engine = Engine::new(
        path,
        BookingConfig::default(),
        clock,
        Arc::new(NotifyHub::new()),
    )
    .unwrap();

    let info = engine.get_resource_info(rid).await.unwrap();
    assert_eq!(info.name, "Ana");
    assert_eq!(info.inactive, Some(Span::new(T0 + DAY, T0 + 2 * DAY)));

    let booking = engine.get_booking(booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert!(!engine.is_free(rid, T0 + 2 * H, 40).await.unwrap());

    assert_eq!(engine.get_waitlist_entry(waitlist_id).unwrap().contact_id, 101);
    assert_eq!(engine.list_blackout_weekdays(), vec![2]);
    assert_eq!(engine.list_blackout_dates(), vec![d]);
    assert_eq!(engine.prayer_times_for(d), Some(vec![T0 + 3 * H]));

    // The index survived too: mutations on replayed bookings work
    engine.cancel_booking(booking_id).await.unwrap();
}

#[tokio::test]
async fn restart_replays_cancellations_and_moves() {
    let path = test_wal_path("restart_moves.wal");
    let clock = Arc::new(ManualClock::new(T0));

    let (a_id, b_id, moved_id, cancelled_id);
    {
        let engine = Engine::new(
            path.clone(),
            BookingConfig::default(),
            clock.clone(),
            Arc::new(NotifyHub::new()),
        )
        .unwrap();
        let a = engine.create_resource("Ana", "any").await.unwrap();
        let b = engine.create_resource("Marsudi", "any").await.unwrap();
        (a_id, b_id) = (a.id, b.id);

        let moved = commit(&engine, a_id, T0 + H).await.unwrap();
        moved_id = moved.id;
        engine
            .reschedule_booking(moved_id, b_id, T0 + 2 * H, 40)
            .await
            .unwrap();

        let cancelled = commit(&engine, a_id, T0 + 4 * H).await.unwrap();
        cancelled_id = cancelled.id;
        engine.cancel_booking(cancelled_id).await.unwrap();
    }

    let engine = Engine::new(
        path,
        BookingConfig::default(),
        clock,
        Arc::new(NotifyHub::new()),
    )
    .unwrap();

    let moved = engine.get_booking(moved_id).await.unwrap();
    assert_eq!(moved.resource_id, b_id);
    assert_eq!(moved.start, T0 + 2 * H);
    assert!(engine.is_free(a_id, T0 + H, 40).await.unwrap());

    let cancelled = engine.get_booking(cancelled_id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn compaction_preserves_state_and_resets_counter() {
    let path = test_wal_path("compaction.wal");
    let clock = Arc::new(ManualClock::new(T0));
    let engine = Engine::new(
        path.clone(),
        BookingConfig::default(),
        clock.clone(),
        Arc::new(NotifyHub::new()),
    )
    .unwrap();

    let r = engine.create_resource("Ana", "any").await.unwrap();
    let booking = commit(&engine, r.id, T0 + H).await.unwrap();
    engine.cancel_booking(booking.id).await.unwrap();
    engine.add_blackout_weekday(6).await.unwrap();
    assert!(engine.wal_appends_since_compact().await >= 4);

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);
    drop(engine);

    let engine = Engine::new(
        path,
        BookingConfig::default(),
        clock,
        Arc::new(NotifyHub::new()),
    )
    .unwrap();
    let stored = engine.get_booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Cancelled);
    assert_eq!(engine.list_blackout_weekdays(), vec![6]);
    assert_eq!(engine.get_resource_info(r.id).await.unwrap().name, "Ana");
}

// ── Prayer cache plumbing ────────────────────────────────

#[tokio::test]
async fn prayer_cache_caps_at_five_instants() {
    let (engine, _) = setup("prayer_cap.wal");
    let d = date(2025, 4, 1);
    let instants: Vec<Ms> = (0..8i64).map(|i| T0 + i * H).collect();
    engine.save_prayer_times(d, instants).await.unwrap();
    assert_eq!(engine.prayer_times_for(d).unwrap().len(), 5);
}

#[tokio::test]
async fn prayer_cache_prune_drops_older_dates() {
    let (engine, _) = setup("prayer_prune.wal");
    let old = date(2025, 3, 30);
    let cutoff = date(2025, 3, 31);
    let fresh = date(2025, 4, 1);
    engine.save_prayer_times(old, vec![T0]).await.unwrap();
    engine.save_prayer_times(cutoff, vec![T0]).await.unwrap();
    engine.save_prayer_times(fresh, vec![T0]).await.unwrap();

    let dropped = engine.prune_prayer_cache(cutoff).await.unwrap();
    assert_eq!(dropped, 1);
    assert!(engine.prayer_times_for(old).is_none());
    assert!(engine.prayer_times_for(cutoff).is_some());
    assert!(engine.prayer_times_for(fresh).is_some());

    // Nothing left to prune
    assert_eq!(engine.prune_prayer_cache(cutoff).await.unwrap(), 0);
}

// ── Input validation ─────────────────────────────────────

#[tokio::test]
async fn commit_validates_inputs() {
    let (engine, _) = setup("commit_validation.wal");
    let r = engine.create_resource("Ana", "any").await.unwrap();

    assert!(matches!(
        engine
            .commit_booking(r.id, 42, "B", "any", "", T0 + H, 40)
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine
            .commit_booking(r.id, 42, "Budi", "any", "", T0 + H, 0)
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine
            .commit_booking(r.id, 42, "Budi", "any", "", -5, 40)
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
}
