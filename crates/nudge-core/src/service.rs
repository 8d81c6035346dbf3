//! User-facing reminder and tag operations.
//!
//! Every mutation is validated, written to the local store, and only then
//! reflected in the platform's alerts. An alert failure never undoes a local
//! write. Mutations and sync passes are serialized so a pass never overwrites
//! an edit made while it was talking to the remote.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::alerts::{
    ActionOutcome, AlertAction, AlertBudgetAllocator, AlertCenter, AlertPayload, AlertScheduler,
    Completion, RescheduleReport,
};
use crate::clock::Clock;
use crate::error::{Result, ValidationError};
use crate::model::{validate_tag_name, NewReminder, Reminder, ReminderPatch, Tag, TagId};
use crate::recurrence::RecurrenceEngine;
use crate::storage::{Config, LocalStore};
use crate::sync::{RemoteStore, SyncCursor, SyncOutcome, SyncReconciler, SyncStatus};

pub struct ReminderService {
    store: Arc<LocalStore>,
    scheduler: Arc<AlertScheduler>,
    reconciler: SyncReconciler,
    clock: Arc<dyn Clock>,
    writer: Mutex<()>,
}

impl ReminderService {
    pub fn new(
        store: Arc<LocalStore>,
        scheduler: Arc<AlertScheduler>,
        reconciler: SyncReconciler,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scheduler,
            reconciler,
            clock,
            writer: Mutex::new(()),
        }
    }

    /// Wire the allocator, scheduler and reconciler from `config`, restoring
    /// the issued alert ids and the sync cursor from `store`.
    pub fn from_config(
        config: &Config,
        store: Arc<LocalStore>,
        center: Arc<dyn AlertCenter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let engine = RecurrenceEngine::new(config.alerts.calendar_zone()?);
        let scheduler = AlertScheduler::new(
            center,
            AlertBudgetAllocator::from_config(engine, &config.alerts),
        )
        .with_default_body(config.alerts.default_body.clone())
        .with_store(store.clone())?;
        let cursor = Arc::new(SyncCursor::load(&store)?);
        let reconciler = SyncReconciler::new(cursor, clock.clone())
            .with_push_local_edits(config.sync.push_local_edits);
        Ok(Self::new(store, Arc::new(scheduler), reconciler, clock))
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn scheduler(&self) -> &AlertScheduler {
        &self.scheduler
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.reconciler.cursor().status()
    }

    pub fn list_reminders(&self) -> Result<Vec<Reminder>> {
        Ok(self.store.list_reminders()?)
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        Ok(self.store.list_tags()?)
    }

    // === Reminders ===

    pub async fn create_reminder(&self, new: NewReminder) -> Result<Reminder> {
        let _writer = self.writer.lock().await;
        let now = self.clock.now();
        let reminder = new.into_reminder(now)?;
        self.check_tags(reminder.tag_ids.iter())?;

        self.store.upsert_reminder(&reminder)?;
        info!(reminder_id = %reminder.id, "reminder created");
        self.reschedule().await?;
        Ok(reminder)
    }

    pub async fn update_reminder(&self, id: &str, patch: ReminderPatch) -> Result<Reminder> {
        let _writer = self.writer.lock().await;
        let mut reminder = self.require_reminder(id)?;
        if let Some(tags) = &patch.tag_ids {
            self.check_tags(tags.iter())?;
        }

        if patch.apply(&mut reminder, self.clock.now())? {
            self.store.upsert_reminder(&reminder)?;
            info!(reminder_id = %id, "reminder updated");
            self.reschedule().await?;
        } else {
            debug!(reminder_id = %id, "update changed nothing");
        }
        Ok(reminder)
    }

    /// Complete a reminder. Recurring reminders move to their next
    /// occurrence instead, until their series ends.
    pub async fn complete_reminder(&self, id: &str) -> Result<(Reminder, Completion)> {
        let _writer = self.writer.lock().await;
        let mut reminder = self.require_reminder(id)?;
        let completion = self.complete_locked(&mut reminder).await?;
        Ok((reminder, completion))
    }

    /// Delete a reminder and its alerts. Returns the deleted record.
    pub async fn delete_reminder(&self, id: &str) -> Result<Reminder> {
        let _writer = self.writer.lock().await;
        let deleted = self
            .store
            .delete_reminder(id, self.clock.now())?
            .ok_or_else(|| ValidationError::UnknownReminder(id.to_string()))?;
        info!(reminder_id = %id, synced = deleted.remote_id.is_some(), "reminder deleted");

        self.scheduler.forget_reminder(id).await;
        self.reschedule().await?;
        Ok(deleted)
    }

    // === Tags ===

    pub async fn create_tag(&self, name: &str, color: &str) -> Result<Tag> {
        let _writer = self.writer.lock().await;
        let tag = Tag::new(name, color, self.clock.now())?;
        self.store.upsert_tag(&tag)?;
        info!(tag_id = %tag.id, "tag created");
        Ok(tag)
    }

    /// Rename or recolor a tag. `None` keeps the current value.
    pub async fn update_tag(
        &self,
        id: &str,
        name: Option<&str>,
        color: Option<&str>,
    ) -> Result<Tag> {
        let _writer = self.writer.lock().await;
        let mut tag = self
            .store
            .get_tag(id)?
            .ok_or_else(|| ValidationError::UnknownTag(id.to_string()))?;
        let before = tag.clone();

        if let Some(name) = name {
            tag.name = validate_tag_name(name)?;
        }
        if let Some(color) = color {
            tag.color = color.to_string();
        }
        if tag != before {
            tag.updated_at = self.clock.now();
            self.store.upsert_tag(&tag)?;
            info!(tag_id = %id, "tag updated");
        }
        Ok(tag)
    }

    /// Delete a tag and unlink it from every reminder.
    pub async fn delete_tag(&self, id: &str) -> Result<Tag> {
        let _writer = self.writer.lock().await;
        let deleted = self
            .store
            .delete_tag(id, self.clock.now())?
            .ok_or_else(|| ValidationError::UnknownTag(id.to_string()))?;
        info!(tag_id = %id, "tag deleted");
        Ok(deleted)
    }

    // === Alerts ===

    /// Apply what the user did with a delivered alert.
    pub async fn handle_alert_action(
        &self,
        action: AlertAction,
        delivered: &AlertPayload,
    ) -> Result<ActionOutcome> {
        let _writer = self.writer.lock().await;
        match action {
            AlertAction::Snooze { .. } => Ok(self
                .scheduler
                .handle_action(action, delivered, &mut [], self.clock.now())
                .await),
            AlertAction::Complete => {
                let Some(mut reminder) = self.store.get_reminder(&delivered.reminder_id)? else {
                    debug!(reminder_id = %delivered.reminder_id, "action for deleted reminder");
                    return Ok(ActionOutcome::Ignored);
                };
                let now = self.clock.now();
                let completion = self.scheduler.complete(&mut reminder, now);
                if completion == Completion::Unchanged {
                    return Ok(ActionOutcome::Ignored);
                }
                self.store.upsert_reminder(&reminder)?;
                self.scheduler.dismiss_delivered(delivered).await;
                let report = self.reschedule().await?;
                Ok(ActionOutcome::Completed {
                    reminder,
                    completion,
                    report,
                })
            }
        }
    }

    /// Re-issue alerts when the host returns to the foreground.
    pub async fn on_foreground(&self) -> Result<RescheduleReport> {
        let _writer = self.writer.lock().await;
        self.reschedule().await
    }

    // === Sync ===

    /// Run one sync pass against `remote`. Overlapping calls are skipped.
    pub async fn sync(&self, remote: &dyn RemoteStore) -> Result<SyncOutcome> {
        let _writer = self.writer.lock().await;
        Ok(self
            .reconciler
            .sync(&self.store, remote, &self.scheduler)
            .await?)
    }

    // === Internals ===

    async fn complete_locked(&self, reminder: &mut Reminder) -> Result<Completion> {
        let completion = self.scheduler.complete(reminder, self.clock.now());
        if completion != Completion::Unchanged {
            self.store.upsert_reminder(reminder)?;
            info!(reminder_id = %reminder.id, ?completion, "reminder completed");
            self.reschedule().await?;
        }
        Ok(completion)
    }

    async fn reschedule(&self) -> Result<RescheduleReport> {
        let reminders = self.store.list_reminders()?;
        Ok(self
            .scheduler
            .reschedule_all(&reminders, self.clock.now())
            .await)
    }

    fn require_reminder(&self, id: &str) -> Result<Reminder> {
        Ok(self
            .store
            .get_reminder(id)?
            .ok_or_else(|| ValidationError::UnknownReminder(id.to_string()))?)
    }

    fn check_tags<'a>(&self, tag_ids: impl Iterator<Item = &'a TagId>) -> Result<()> {
        let known: HashSet<TagId> = self.store.list_tags()?.into_iter().map(|t| t.id).collect();
        for id in tag_ids {
            if !known.contains(id) {
                return Err(ValidationError::UnknownTag(id.clone()).into());
            }
        }
        Ok(())
    }
}
