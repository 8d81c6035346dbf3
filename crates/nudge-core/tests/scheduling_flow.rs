//! Integration tests for reminder scheduling.
//!
//! These tests drive the service against an on-disk store and the in-memory
//! alert center, checking what ends up pending on the platform.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use nudge_core::alerts::{AlertAction, Completion};
use nudge_core::{
    Config, FixedClock, LocalStore, MemoryAlertCenter, NewReminder, RecurrenceEngine,
    RecurrenceRule, ReminderService,
};

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

fn utc_config() -> Config {
    let mut config = Config::default();
    config.alerts.utc_offset_minutes = Some(0);
    config
}

fn service_at(
    store: Arc<LocalStore>,
    now: DateTime<Utc>,
) -> (ReminderService, Arc<MemoryAlertCenter>, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(now));
    let center = Arc::new(MemoryAlertCenter::new());
    let service =
        ReminderService::from_config(&utc_config(), store, center.clone(), clock.clone()).unwrap();
    (service, center, clock)
}

#[tokio::test]
async fn test_budget_holds_with_many_reminders() {
    let now = at(2025, 1, 6, 8, 0);
    let store = Arc::new(LocalStore::open_memory().unwrap());
    let (service, center, _clock) = service_at(store, now);

    for i in 0..20 {
        service
            .create_reminder(NewReminder::new(
                format!("One-off {i}"),
                now + Duration::hours(i + 1),
            ))
            .await
            .unwrap();
    }
    for i in 0..5 {
        service
            .create_reminder(
                NewReminder::new(format!("Hourly {i}"), now + Duration::minutes(10 * i + 5))
                    .recurring(RecurrenceRule::Hourly),
            )
            .await
            .unwrap();
    }

    let pending = center.pending();
    assert_eq!(pending.len(), 64);
    let one_time = pending.iter().filter(|(_, _, p)| !p.recurring).count();
    assert_eq!(one_time, 14);
    assert!(pending.iter().all(|(_, fire_at, _)| *fire_at > now));
}

#[tokio::test]
async fn test_monthly_31_clamps_and_recovers() {
    let engine = RecurrenceEngine::new(nudge_core::CalendarZone::utc());
    let rule = RecurrenceRule::monthly(31).unwrap();
    let jan = at(2025, 1, 31, 9, 30);

    let dates = engine.occurrences(&rule, jan, 3, jan - Duration::seconds(1));
    assert_eq!(
        dates,
        vec![jan, at(2025, 2, 28, 9, 30), at(2025, 3, 31, 9, 30)]
    );

    let leap = engine.next_occurrence(&rule, at(2024, 1, 31, 9, 30));
    assert_eq!(leap, Some(at(2024, 2, 29, 9, 30)));
}

#[tokio::test]
async fn test_weekly_completion_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nudge.db");
    // 2025-01-06 is a Monday
    let monday_nine = at(2025, 1, 6, 9, 0);

    let id = {
        let store = Arc::new(LocalStore::open_at(&path).unwrap());
        let (service, _center, _clock) = service_at(store, monday_nine - Duration::hours(1));
        let reminder = service
            .create_reminder(
                NewReminder::new("Team sync", monday_nine)
                    .recurring(RecurrenceRule::weekly(2).unwrap()),
            )
            .await
            .unwrap();
        let (_, completion) = service.complete_reminder(&reminder.id).await.unwrap();
        assert_eq!(completion, Completion::Advanced(monday_nine + Duration::weeks(1)));
        reminder.id
    };

    let store = Arc::new(LocalStore::open_at(&path).unwrap());
    let (service, center, _clock) = service_at(store, monday_nine);
    let reloaded = service.store().get_reminder(&id).unwrap().unwrap();
    assert_eq!(reloaded.scheduled_date, monday_nine + Duration::weeks(1));
    assert_eq!(reloaded.recurrence, RecurrenceRule::Weekly { weekday: 2 });
    assert!(!reloaded.is_completed);

    service.on_foreground().await.unwrap();
    let first = center.pending().into_iter().next().unwrap();
    assert_eq!(first.0, format!("{id}-0"));
    assert_eq!(first.1, monday_nine + Duration::weeks(1));
}

#[tokio::test]
async fn test_exhausted_series_stops_alerting() {
    let now = at(2025, 3, 1, 7, 0);
    let store = Arc::new(LocalStore::open_memory().unwrap());
    let (service, center, _clock) = service_at(store, now);

    let reminder = service
        .create_reminder(
            NewReminder::new("Course", now + Duration::hours(1))
                .recurring(RecurrenceRule::Daily)
                .until(now + Duration::hours(12)),
        )
        .await
        .unwrap();
    assert_eq!(center.pending_ids(), vec![format!("{}-0", reminder.id)]);

    let (done, completion) = service.complete_reminder(&reminder.id).await.unwrap();
    assert_eq!(completion, Completion::SeriesEnded);
    assert!(done.is_completed);
    assert!(center.pending_ids().is_empty());

    let (_, again) = service.complete_reminder(&reminder.id).await.unwrap();
    assert_eq!(again, Completion::Unchanged);
}

#[tokio::test]
async fn test_completing_from_alert_moves_recurring_reminder() {
    let now = at(2025, 5, 5, 6, 0);
    let store = Arc::new(LocalStore::open_memory().unwrap());
    let (service, center, clock) = service_at(store, now);

    let reminder = service
        .create_reminder(
            NewReminder::new("Stretch", now + Duration::hours(1)).recurring(RecurrenceRule::Daily),
        )
        .await
        .unwrap();
    let (_, _, payload) = center.pending().into_iter().next().unwrap();
    assert!(payload.recurring);

    clock.advance(Duration::hours(1));
    service
        .handle_alert_action(AlertAction::Complete, &payload)
        .await
        .unwrap();

    let stored = service.store().get_reminder(&reminder.id).unwrap().unwrap();
    assert_eq!(stored.scheduled_date, now + Duration::hours(1) + Duration::days(1));
    assert!(center
        .delivered_cancelled()
        .contains(&format!("{}-0", reminder.id)));
    assert!(center
        .pending()
        .iter()
        .all(|(_, fire_at, _)| *fire_at >= stored.scheduled_date));
}

#[tokio::test]
async fn test_alerts_from_before_restart_are_released() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nudge.db");
    let now = at(2025, 6, 2, 7, 0);
    let center = Arc::new(MemoryAlertCenter::new());
    let open = |center: &Arc<MemoryAlertCenter>| {
        ReminderService::from_config(
            &utc_config(),
            Arc::new(LocalStore::open_at(&path).unwrap()),
            center.clone(),
            Arc::new(FixedClock::new(now)),
        )
        .unwrap()
    };

    let (gone, moved) = {
        let service = open(&center);
        let gone = service
            .create_reminder(NewReminder::new("Water plants", now + Duration::hours(2)))
            .await
            .unwrap();
        let moved = service
            .create_reminder(NewReminder::new("Call bank", now + Duration::hours(3)))
            .await
            .unwrap();
        (gone, moved)
    };
    assert_eq!(center.pending_ids().len(), 2);

    let service = open(&center);
    service.delete_reminder(&gone.id).await.unwrap();
    assert_eq!(center.pending_ids(), vec![format!("{}-0", moved.id)]);

    service
        .update_reminder(
            &moved.id,
            nudge_core::ReminderPatch {
                scheduled_date: Some(now + Duration::hours(8)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let pending = center.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].1, now + Duration::hours(8));
}
