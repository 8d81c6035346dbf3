//! Alert planning and the boundary to the platform's alert scheduler.
//!
//! The platform allows only a fixed number of pending alerts. The
//! [`AlertBudgetAllocator`] decides which occurrences get one, and the
//! [`AlertScheduler`] keeps the platform in step with that decision.

pub mod budget;
pub mod scheduler;

pub use budget::{AlertBudgetAllocator, AllocatedAlert};
pub use scheduler::{ActionOutcome, AlertAction, AlertScheduler, Completion, RescheduleReport};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AlertIssuanceError;
use crate::model::ReminderId;

/// Platform identifier for one occurrence's alert: `"{reminder_id}-{index}"`.
pub fn alert_identifier(reminder_id: &str, occurrence_index: usize) -> String {
    format!("{reminder_id}-{occurrence_index}")
}

/// Identifier used for a snoozed re-delivery of a reminder.
pub fn snooze_identifier(reminder_id: &str) -> String {
    format!("{reminder_id}-snooze")
}

/// Content handed to the platform with each alert request.
///
/// `reminder_id` and `recurring` ride along as metadata so actions taken on a
/// delivered alert can be handled without reading storage first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub title: String,
    pub body: String,
    pub recurring: bool,
    pub reminder_id: ReminderId,
    pub occurrence_index: usize,
}

/// A derived, never-persisted alert for one occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertInstance {
    pub reminder_id: ReminderId,
    pub occurrence_index: usize,
    pub fire_at: DateTime<Utc>,
}

impl AlertInstance {
    pub fn identifier(&self) -> String {
        alert_identifier(&self.reminder_id, self.occurrence_index)
    }
}

/// The host platform's alert scheduler.
///
/// Cancellation is best-effort: cancelling an unknown id is not an error.
#[async_trait]
pub trait AlertCenter: Send + Sync {
    async fn schedule(
        &self,
        id: &str,
        fire_at: DateTime<Utc>,
        payload: &AlertPayload,
    ) -> Result<(), AlertIssuanceError>;

    async fn cancel(&self, ids: &[String]);

    async fn cancel_delivered(&self, ids: &[String]);
}

/// In-process alert center for tests and hosts without platform alerts.
#[derive(Debug, Default)]
pub struct MemoryAlertCenter {
    state: Mutex<MemoryAlertState>,
}

#[derive(Debug, Default)]
struct MemoryAlertState {
    pending: BTreeMap<String, (DateTime<Utc>, AlertPayload)>,
    rejected: BTreeSet<String>,
    cancel_calls: usize,
    delivered_cancelled: Vec<String>,
}

impl MemoryAlertCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future `schedule` call for `id` fail.
    pub fn reject(&self, id: impl Into<String>) {
        self.lock().rejected.insert(id.into());
    }

    /// Currently pending alerts, ordered by id.
    pub fn pending(&self) -> Vec<(String, DateTime<Utc>, AlertPayload)> {
        self.lock()
            .pending
            .iter()
            .map(|(id, (at, payload))| (id.clone(), *at, payload.clone()))
            .collect()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.lock().pending.keys().cloned().collect()
    }

    pub fn cancel_calls(&self) -> usize {
        self.lock().cancel_calls
    }

    pub fn delivered_cancelled(&self) -> Vec<String> {
        self.lock().delivered_cancelled.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryAlertState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AlertCenter for MemoryAlertCenter {
    async fn schedule(
        &self,
        id: &str,
        fire_at: DateTime<Utc>,
        payload: &AlertPayload,
    ) -> Result<(), AlertIssuanceError> {
        let mut state = self.lock();
        if state.rejected.contains(id) {
            return Err(AlertIssuanceError {
                id: id.to_string(),
                reason: "rejected by platform".to_string(),
            });
        }
        state
            .pending
            .insert(id.to_string(), (fire_at, payload.clone()));
        Ok(())
    }

    async fn cancel(&self, ids: &[String]) {
        let mut state = self.lock();
        state.cancel_calls += 1;
        for id in ids {
            state.pending.remove(id);
        }
    }

    async fn cancel_delivered(&self, ids: &[String]) {
        self.lock().delivered_cancelled.extend(ids.iter().cloned());
    }
}
