//! Integration tests for reminder sync.
//!
//! Each "device" is a service with its own store and alert center. Devices
//! share one in-memory remote store and one clock.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use nudge_core::model::ReminderPatch;
use nudge_core::sync::{RemoteReminder, SyncCursor, SyncOperation};
use nudge_core::{
    Config, FixedClock, LocalStore, MemoryAlertCenter, MemoryRemoteStore, NewReminder,
    RecurrenceRule, ReminderService, SyncOutcome, SyncReport,
};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 14, 8, 0, 0).unwrap()
}

struct Device {
    service: ReminderService,
    center: Arc<MemoryAlertCenter>,
}

impl Device {
    fn new(clock: &Arc<FixedClock>) -> Self {
        Self::with_store(clock, Arc::new(LocalStore::open_memory().unwrap()))
    }

    fn with_store(clock: &Arc<FixedClock>, store: Arc<LocalStore>) -> Self {
        let mut config = Config::default();
        config.alerts.utc_offset_minutes = Some(0);
        let center = Arc::new(MemoryAlertCenter::new());
        let service =
            ReminderService::from_config(&config, store, center.clone(), clock.clone()).unwrap();
        Self { service, center }
    }

    async fn sync(&self, remote: &MemoryRemoteStore) -> SyncReport {
        match self.service.sync(remote).await.unwrap() {
            SyncOutcome::Completed(report) => report,
            SyncOutcome::Skipped => panic!("sync skipped"),
        }
    }
}

fn setup() -> (Arc<FixedClock>, MemoryRemoteStore) {
    let clock = Arc::new(FixedClock::new(start()));
    let remote = MemoryRemoteStore::new(clock.clone());
    (clock, remote)
}

fn remote_record(id: &str, title: &str, updated_at: DateTime<Utc>) -> RemoteReminder {
    RemoteReminder {
        id: id.into(),
        title: title.into(),
        notes: Some("from the server".into()),
        scheduled_date: start() + Duration::days(1),
        is_completed: false,
        recurrence: RecurrenceRule::Daily,
        recurrence_end_date: None,
        created_at: start() - Duration::days(3),
        updated_at,
        tag_ids: vec![],
    }
}

#[tokio::test]
async fn test_local_only_reminder_takes_server_identity() {
    let (clock, remote) = setup();
    let device = Device::new(&clock);
    let reminder = device
        .service
        .create_reminder(NewReminder::new("Renew passport", start() + Duration::days(2)))
        .await
        .unwrap();

    clock.advance(Duration::seconds(30));
    let report = device.sync(&remote).await;
    assert_eq!(report.reminders.pushed, 1);

    let stored = device.service.store().get_reminder(&reminder.id).unwrap().unwrap();
    let server = remote.reminder(stored.remote_id.as_deref().unwrap()).unwrap();
    assert_eq!(stored.updated_at, server.updated_at);
    assert_eq!(server.title, "Renew passport");
}

#[tokio::test]
async fn test_second_pass_makes_no_mutations() {
    let (clock, remote) = setup();
    let device = Device::new(&clock);
    let tag = device.service.create_tag("Health", "#ef4444").await.unwrap();
    device
        .service
        .create_reminder(NewReminder::new("Vitamins", start() + Duration::hours(1)).tagged(tag.id))
        .await
        .unwrap();
    remote.put_reminder(remote_record("srv-other", "Other device", start()));

    device.sync(&remote).await;
    let before = device.service.store().snapshot().unwrap();
    let (creates, updates) = (remote.create_calls(), remote.update_calls());

    clock.advance(Duration::minutes(5));
    let second = device.sync(&remote).await;
    assert!(second.is_noop());
    assert_eq!(device.service.store().snapshot().unwrap(), before);
    assert_eq!(remote.create_calls(), creates);
    assert_eq!(remote.update_calls(), updates);
}

#[tokio::test]
async fn test_remote_newer_overwrites_local() {
    let (clock, remote) = setup();
    let device = Device::new(&clock);
    remote.put_reminder(remote_record("srv-1", "Original", start()));
    device.sync(&remote).await;

    remote.put_reminder(remote_record("srv-1", "Edited elsewhere", start() + Duration::minutes(1)));
    let report = device.sync(&remote).await;
    assert_eq!(report.reminders.updated_locally, 1);

    let local = device.service.list_reminders().unwrap().pop().unwrap();
    assert_eq!(local.title, "Edited elsewhere");
    assert_eq!(local.updated_at, start() + Duration::minutes(1));
}

#[tokio::test]
async fn test_local_newer_is_left_untouched() {
    let (clock, remote) = setup();
    let device = Device::new(&clock);
    remote.put_reminder(remote_record("srv-1", "Original", start()));
    device.sync(&remote).await;
    let local = device.service.list_reminders().unwrap().pop().unwrap();

    clock.advance(Duration::minutes(10));
    let edited = device
        .service
        .update_reminder(
            &local.id,
            ReminderPatch {
                title: Some("Edited here".into()),
                notes: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    remote.put_reminder(remote_record("srv-1", "Edited there", start() + Duration::minutes(5)));

    device.sync(&remote).await;
    let after = device.service.store().get_reminder(&local.id).unwrap().unwrap();
    assert_eq!(after, edited);
}

#[tokio::test]
async fn test_timestamp_tie_keeps_local() {
    let (clock, remote) = setup();
    let device = Device::new(&clock);
    remote.put_reminder(remote_record("srv-1", "Shared", start()));
    device.sync(&remote).await;
    let local = device.service.list_reminders().unwrap().pop().unwrap();

    let mut same_time = remote_record("srv-1", "Different title", local.updated_at);
    same_time.notes = None;
    remote.put_reminder(same_time);

    let report = device.sync(&remote).await;
    assert_eq!(report.reminders.updated_locally, 0);
    assert_eq!(device.service.list_reminders().unwrap(), vec![local]);
}

#[tokio::test]
async fn test_tags_follow_reminders_across_devices() {
    let (clock, remote) = setup();
    let phone = Device::new(&clock);
    let laptop = Device::new(&clock);

    let tag = phone.service.create_tag("Garden", "#16a34a").await.unwrap();
    phone
        .service
        .create_reminder(
            NewReminder::new("Mow lawn", start() + Duration::days(1))
                .recurring(RecurrenceRule::weekly(7).unwrap())
                .tagged(tag.id.clone()),
        )
        .await
        .unwrap();
    phone.sync(&remote).await;

    clock.advance(Duration::minutes(1));
    let report = laptop.sync(&remote).await;
    assert_eq!(report.tags.created_locally, 1);
    assert_eq!(report.reminders.created_locally, 1);

    let laptop_tag = laptop.service.list_tags().unwrap().pop().unwrap();
    let laptop_reminder = laptop.service.list_reminders().unwrap().pop().unwrap();
    assert_ne!(laptop_tag.id, tag.id);
    assert_eq!(laptop_tag.name, "Garden");
    assert!(laptop_reminder.tag_ids.contains(&laptop_tag.id));
    assert_eq!(laptop_reminder.recurrence, RecurrenceRule::Weekly { weekday: 7 });
    assert!(!laptop.center.pending_ids().is_empty());
}

#[tokio::test]
async fn test_local_delete_is_pushed_once() {
    let (clock, remote) = setup();
    let device = Device::new(&clock);
    let reminder = device
        .service
        .create_reminder(NewReminder::new("Temporary", start() + Duration::hours(4)))
        .await
        .unwrap();
    device.sync(&remote).await;
    let remote_id = device
        .service
        .store()
        .get_reminder(&reminder.id)
        .unwrap()
        .unwrap()
        .remote_id
        .unwrap();

    device.service.delete_reminder(&reminder.id).await.unwrap();
    assert!(device.center.pending_ids().is_empty());

    let report = device.sync(&remote).await;
    assert_eq!(report.reminders.deleted_remotely, 1);
    assert!(remote.reminder(&remote_id).is_none());
    assert!(device.service.list_reminders().unwrap().is_empty());

    device.sync(&remote).await;
    assert_eq!(remote.deleted_ids(), vec![remote_id]);
}

#[tokio::test]
async fn test_deleted_tag_is_unlinked_remotely() {
    let (clock, remote) = setup();
    let device = Device::new(&clock);
    let tag = device.service.create_tag("Old", "#64748b").await.unwrap();
    let reminder = device
        .service
        .create_reminder(NewReminder::new("Keep me", start() + Duration::hours(2)).tagged(tag.id.clone()))
        .await
        .unwrap();
    device.sync(&remote).await;
    assert_eq!(remote.tags().len(), 1);

    clock.advance(Duration::minutes(1));
    device.service.delete_tag(&tag.id).await.unwrap();
    let report = device.sync(&remote).await;

    assert_eq!(report.tags.deleted_remotely, 1);
    assert!(remote.tags().is_empty());
    let local = device.service.store().get_reminder(&reminder.id).unwrap().unwrap();
    assert!(local.tag_ids.is_empty());
    let server = remote.reminder(local.remote_id.as_deref().unwrap()).unwrap();
    assert!(server.tag_ids.is_empty());
}

#[tokio::test]
async fn test_remote_absence_keeps_local_copy() {
    let (clock, remote) = setup();
    let phone = Device::new(&clock);
    let laptop = Device::new(&clock);
    let reminder = phone
        .service
        .create_reminder(NewReminder::new("Shared chore", start() + Duration::hours(6)))
        .await
        .unwrap();
    phone.sync(&remote).await;
    laptop.sync(&remote).await;

    phone.service.delete_reminder(&reminder.id).await.unwrap();
    phone.sync(&remote).await;
    assert!(remote.reminders().is_empty());

    let report = laptop.sync(&remote).await;
    assert!(report.is_noop());
    assert_eq!(laptop.service.list_reminders().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_remote_record_is_reported_and_skipped() {
    let (clock, remote) = setup();
    let device = Device::new(&clock);
    remote.put_reminder(remote_record("srv-good", "Fine", start()));
    remote.put_reminder(remote_record("srv-bad", "   ", start()));

    let report = device.sync(&remote).await;
    assert_eq!(report.reminders.created_locally, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, "srv-bad");
    assert_eq!(report.failures[0].operation, SyncOperation::Accept);
    assert!(device
        .service
        .sync_status()
        .last_sync_error
        .unwrap()
        .contains("srv-bad"));
}

#[tokio::test]
async fn test_failed_fetch_keeps_local_data_and_cursor_survives_restart() {
    let (clock, remote) = setup();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nudge.db");

    {
        let device = Device::with_store(&clock, Arc::new(LocalStore::open_at(&path).unwrap()));
        device
            .service
            .create_reminder(NewReminder::new("Offline edit", start() + Duration::hours(1)))
            .await
            .unwrap();
        device.sync(&remote).await;

        clock.advance(Duration::minutes(15));
        remote.set_fail_listing(true);
        let before = device.service.store().snapshot().unwrap();
        assert!(device.service.sync(&remote).await.is_err());
        assert_eq!(device.service.store().snapshot().unwrap(), before);
    }

    let store = LocalStore::open_at(&path).unwrap();
    let status = SyncCursor::load(&store).unwrap().status();
    assert_eq!(status.last_sync_completed_at, Some(start()));
    assert!(status.last_sync_error.is_some());
    assert!(!status.is_sync_in_flight);
    assert_eq!(store.list_reminders().unwrap().len(), 1);
}
