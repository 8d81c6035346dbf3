//! Wire records, sync results and sync errors.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::RescheduleReport;
use crate::error::{RemoteError, StoreError};
use crate::model::{EntityKind, RecurrenceRule};

/// A tag as the remote store returns it. `id` is the remote id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTag {
    pub id: String,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reminder as the remote store returns it. `id` and `tag_ids` are
/// remote ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteReminder {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub scheduled_date: DateTime<Utc>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub recurrence: RecurrenceRule,
    #[serde(default)]
    pub recurrence_end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tag_ids: Vec<String>,
}

/// Body of a tag create or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagInput {
    pub name: String,
    pub color: String,
}

/// Body of a reminder create or update. `tag_ids` are remote ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderInput {
    pub title: String,
    pub notes: Option<String>,
    pub scheduled_date: DateTime<Utc>,
    pub is_completed: bool,
    pub recurrence: RecurrenceRule,
    pub recurrence_end_date: Option<DateTime<Utc>>,
    pub tag_ids: Vec<String>,
}

/// Which remote call failed for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
    /// A remote record was rejected before merging.
    Accept,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
            SyncOperation::Accept => "accept",
        })
    }
}

/// One entity that failed during a sync pass. Siblings are unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    pub kind: EntityKind,
    /// Local id, or remote id for tombstones and rejected remote records.
    pub id: String,
    pub operation: SyncOperation,
    pub message: String,
}

impl fmt::Display for EntityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} failed: {}",
            self.kind, self.id, self.operation, self.message
        )
    }
}

/// Mutations of one entity kind in a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    /// Remote records new to this device.
    pub created_locally: usize,
    /// Local records overwritten by a newer remote version.
    pub updated_locally: usize,
    /// Local-only records created remotely.
    pub pushed: usize,
    /// Local edits pushed to existing remote records.
    pub edits_pushed: usize,
    /// Tombstones resolved on the remote.
    pub deleted_remotely: usize,
}

impl MergeCounts {
    pub fn total(&self) -> usize {
        self.created_locally
            + self.updated_locally
            + self.pushed
            + self.edits_pushed
            + self.deleted_remotely
    }
}

/// Result of a completed sync pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub tags: MergeCounts,
    pub reminders: MergeCounts,
    pub failures: Vec<EntityFailure>,
    pub alerts: RescheduleReport,
}

impl SyncReport {
    /// True when the pass changed nothing on either side.
    pub fn is_noop(&self) -> bool {
        self.tags.total() == 0 && self.reminders.total() == 0 && self.failures.is_empty()
    }

    /// Summary stored as the cursor's last error when some entities failed.
    pub fn failure_summary(&self) -> Option<String> {
        match self.failures.as_slice() {
            [] => None,
            [only] => Some(only.to_string()),
            [first, rest @ ..] => Some(format!("{first} (and {} more)", rest.len())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another pass was already in flight.
    Skipped,
}

/// A sync pass that was aborted. Local data is unchanged unless noted.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
