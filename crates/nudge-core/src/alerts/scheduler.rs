//! Keeps the platform's pending alerts in step with the budget allocator.
//!
//! Every reschedule cancels what was issued before and then issues the full
//! allocation again. Cancellation is awaited before the first new request
//! goes out, so an old and a new alert never coexist for the same id.
//!
//! The issued ids are written to the store's kv table after every change, so
//! a restarted process can still cancel alerts an earlier one issued.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::{snooze_identifier, AlertBudgetAllocator, AlertCenter, AlertPayload};
use crate::error::StoreError;
use crate::model::{Reminder, ReminderId};
use crate::recurrence::Advancement;
use crate::storage::LocalStore;

const DEFAULT_BODY: &str = "Reminder";
const ISSUED_KEY: &str = "issued_alerts";

/// Summary of one reschedule pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescheduleReport {
    pub cancelled: usize,
    pub scheduled: usize,
    /// Ids the platform rejected. Logged and skipped.
    pub failed: Vec<String>,
}

/// What the user did with a delivered alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    Complete,
    Snooze { minutes: u32 },
}

/// Result of completing a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Recurring reminder moved to its next occurrence.
    Advanced(DateTime<Utc>),
    /// Recurring reminder ran past its end date and is now completed.
    SeriesEnded,
    /// One-time reminder marked completed.
    Completed,
    /// Already completed; nothing changed.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The reminder changed and must be persisted by the caller.
    Completed {
        reminder: Reminder,
        completion: Completion,
        report: RescheduleReport,
    },
    Snoozed { alert_id: String },
    /// The referenced reminder is gone, already done, or the snooze was rejected.
    Ignored,
}

pub struct AlertScheduler {
    center: Arc<dyn AlertCenter>,
    allocator: AlertBudgetAllocator,
    default_body: String,
    /// Issued alert id -> reminder id.
    issued: Mutex<BTreeMap<String, ReminderId>>,
    store: Option<Arc<LocalStore>>,
}

impl AlertScheduler {
    pub fn new(center: Arc<dyn AlertCenter>, allocator: AlertBudgetAllocator) -> Self {
        Self {
            center,
            allocator,
            default_body: DEFAULT_BODY.to_string(),
            issued: Mutex::new(BTreeMap::new()),
            store: None,
        }
    }

    /// Keep issued ids in `store`, starting from what an earlier process
    /// left there. An unreadable entry starts empty.
    pub fn with_store(mut self, store: Arc<LocalStore>) -> Result<Self, StoreError> {
        let issued = match store.kv_get(ISSUED_KEY)? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "discarding unreadable issued alert ids");
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };
        self.issued = Mutex::new(issued);
        self.store = Some(store);
        Ok(self)
    }

    /// Body used when a reminder has no notes.
    pub fn with_default_body(mut self, body: impl Into<String>) -> Self {
        self.default_body = body.into();
        self
    }

    pub fn allocator(&self) -> &AlertBudgetAllocator {
        &self.allocator
    }

    /// Alert ids issued by the last reschedule.
    pub fn issued_ids(&self) -> Vec<String> {
        self.lock_issued().keys().cloned().collect()
    }

    /// Cancel everything previously issued, then issue the allocator's full
    /// plan for `reminders`. A rejected request never stops the others.
    pub async fn reschedule_all(
        &self,
        reminders: &[Reminder],
        now: DateTime<Utc>,
    ) -> RescheduleReport {
        let previous: Vec<String> = std::mem::take(&mut *self.lock_issued())
            .into_keys()
            .collect();
        let mut report = RescheduleReport {
            cancelled: previous.len(),
            ..Default::default()
        };
        if !previous.is_empty() {
            self.center.cancel(&previous).await;
        }

        let plan = self.allocator.allocate(reminders, now);
        for alert in &plan {
            let id = alert.identifier();
            let payload = self.payload_for(alert.reminder, alert.occurrence_index);
            match self.center.schedule(&id, alert.fire_at, &payload).await {
                Ok(()) => {
                    self.lock_issued().insert(id, alert.reminder.id.clone());
                    report.scheduled += 1;
                }
                Err(err) => {
                    warn!(alert_id = %id, error = %err, "alert request rejected; skipping");
                    report.failed.push(id);
                }
            }
        }
        self.persist_issued();

        info!(
            cancelled = report.cancelled,
            scheduled = report.scheduled,
            failed = report.failed.len(),
            "alerts rescheduled"
        );
        report
    }

    /// Cancel pending and delivered alerts of one reminder, including a
    /// snoozed re-delivery.
    pub async fn forget_reminder(&self, reminder_id: &str) {
        let mut ids: Vec<String> = {
            let mut issued = self.lock_issued();
            let ids: Vec<String> = issued
                .iter()
                .filter(|(_, owner)| owner.as_str() == reminder_id)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                issued.remove(id);
            }
            ids
        };
        self.persist_issued();
        ids.push(snooze_identifier(reminder_id));

        debug!(reminder_id, count = ids.len(), "cancelling alerts for reminder");
        self.center.cancel(&ids).await;
        self.center.cancel_delivered(&ids).await;
    }

    /// Mark `reminder` done: recurring reminders advance to their next
    /// occurrence, one-time reminders complete.
    pub fn complete(&self, reminder: &mut Reminder, now: DateTime<Utc>) -> Completion {
        if reminder.is_completed {
            return Completion::Unchanged;
        }
        if !reminder.is_recurring() {
            reminder.is_completed = true;
            reminder.updated_at = now;
            return Completion::Completed;
        }
        match self
            .allocator
            .engine()
            .advance_to_next_occurrence(reminder, now)
        {
            Advancement::Advanced(next) => Completion::Advanced(next),
            Advancement::Exhausted => Completion::SeriesEnded,
            Advancement::Unchanged => Completion::Unchanged,
        }
    }

    /// Handle a user action on a delivered alert.
    ///
    /// `Complete` mutates the matching entry of `reminders` and reschedules
    /// everything; the caller persists the returned reminder. `Snooze`
    /// re-delivers from the payload alone.
    pub async fn handle_action(
        &self,
        action: AlertAction,
        delivered: &AlertPayload,
        reminders: &mut [Reminder],
        now: DateTime<Utc>,
    ) -> ActionOutcome {
        match action {
            AlertAction::Snooze { minutes } => match self.snooze(delivered, minutes, now).await {
                Some(alert_id) => ActionOutcome::Snoozed { alert_id },
                None => ActionOutcome::Ignored,
            },
            AlertAction::Complete => {
                let Some(reminder) = reminders
                    .iter_mut()
                    .find(|r| r.id == delivered.reminder_id)
                else {
                    debug!(reminder_id = %delivered.reminder_id, "action for unknown reminder");
                    return ActionOutcome::Ignored;
                };
                let completion = self.complete(reminder, now);
                if completion == Completion::Unchanged {
                    return ActionOutcome::Ignored;
                }
                let reminder = reminder.clone();

                self.dismiss_delivered(delivered).await;
                let report = self.reschedule_all(reminders, now).await;
                ActionOutcome::Completed {
                    reminder,
                    completion,
                    report,
                }
            }
        }
    }

    /// Remove the delivered alert `delivered` came from.
    pub async fn dismiss_delivered(&self, delivered: &AlertPayload) {
        let id = super::alert_identifier(&delivered.reminder_id, delivered.occurrence_index);
        self.center.cancel_delivered(&[id]).await;
    }

    async fn snooze(
        &self,
        delivered: &AlertPayload,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let id = snooze_identifier(&delivered.reminder_id);
        let fire_at = now + Duration::minutes(i64::from(minutes));
        match self.center.schedule(&id, fire_at, delivered).await {
            Ok(()) => {
                debug!(alert_id = %id, %fire_at, recurring = delivered.recurring, "alert snoozed");
                Some(id)
            }
            Err(err) => {
                warn!(alert_id = %id, error = %err, "snooze request rejected");
                None
            }
        }
    }

    fn payload_for(&self, reminder: &Reminder, occurrence_index: usize) -> AlertPayload {
        AlertPayload {
            title: reminder.title.clone(),
            body: reminder
                .notes
                .clone()
                .unwrap_or_else(|| self.default_body.clone()),
            recurring: reminder.is_recurring(),
            reminder_id: reminder.id.clone(),
            occurrence_index,
        }
    }

    fn persist_issued(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let written = serde_json::to_string(&*self.lock_issued())
            .map_err(|e| StoreError::Codec {
                column: "kv.issued_alerts",
                message: e.to_string(),
            })
            .and_then(|raw| store.kv_set(ISSUED_KEY, &raw));
        if let Err(e) = written {
            warn!(error = %e, "failed to persist issued alert ids");
        }
    }

    fn lock_issued(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, ReminderId>> {
        self.issued.lock().unwrap_or_else(|e| e.into_inner())
    }
}
