//! Last-write-wins merge of remote records into the local set.
//!
//! Pure functions only: nothing here touches the network or the store.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{
    EntityFailure, MergeCounts, ReminderInput, RemoteReminder, RemoteTag, SyncOperation, TagInput,
};
use crate::error::ValidationError;
use crate::model::{validate_tag_name, validate_title, EntityKind, Reminder, Tag, TagId};

/// Merge decision for a record present on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    KeepLocal,
    UseRemote,
}

/// Whole-record last-write-wins. Equal timestamps keep the local record.
pub fn decide_merge(local_updated: DateTime<Utc>, remote_updated: DateTime<Utc>) -> MergeDecision {
    if remote_updated > local_updated {
        MergeDecision::UseRemote
    } else {
        MergeDecision::KeepLocal
    }
}

fn position_by_remote_id<'a, I>(remote_ids: I) -> HashMap<String, usize>
where
    I: Iterator<Item = Option<&'a String>>,
{
    remote_ids
        .enumerate()
        .filter_map(|(idx, remote_id)| remote_id.map(|id| (id.clone(), idx)))
        .collect()
}

/// Fold remote tags into `local`.
///
/// Remote tags listed in `tombstoned` are still waiting for a remote delete
/// and are ignored. Local tags the remote does not know are kept as they are.
/// Tags with a blank name are skipped and reported in `failures`.
pub fn merge_tags(
    local: &mut Vec<Tag>,
    remote: &[RemoteTag],
    tombstoned: &HashSet<String>,
    failures: &mut Vec<EntityFailure>,
) -> MergeCounts {
    let mut counts = MergeCounts::default();
    let positions = position_by_remote_id(local.iter().map(|t| t.remote_id.as_ref()));

    for theirs in remote {
        if tombstoned.contains(&theirs.id) {
            debug!(remote_id = %theirs.id, "skipping tombstoned remote tag");
            continue;
        }
        let name = match validate_tag_name(&theirs.name) {
            Ok(name) => name,
            Err(err) => {
                warn!(remote_id = %theirs.id, error = %err, "rejecting remote tag");
                failures.push(EntityFailure {
                    kind: EntityKind::Tag,
                    id: theirs.id.clone(),
                    operation: SyncOperation::Accept,
                    message: err.to_string(),
                });
                continue;
            }
        };
        match positions.get(&theirs.id) {
            Some(&idx) => {
                let ours = &mut local[idx];
                if decide_merge(ours.updated_at, theirs.updated_at) == MergeDecision::UseRemote {
                    ours.name = name;
                    ours.color = theirs.color.clone();
                    ours.created_at = theirs.created_at;
                    ours.updated_at = theirs.updated_at;
                    counts.updated_locally += 1;
                }
            }
            None => {
                local.push(Tag {
                    id: Uuid::new_v4().to_string(),
                    remote_id: Some(theirs.id.clone()),
                    name,
                    color: theirs.color.clone(),
                    created_at: theirs.created_at,
                    updated_at: theirs.updated_at,
                });
                counts.created_locally += 1;
            }
        }
    }
    counts
}

/// Remote tag id -> local tag id.
pub fn remote_tag_index(tags: &[Tag]) -> HashMap<String, TagId> {
    tags.iter()
        .filter_map(|t| t.remote_id.clone().map(|remote| (remote, t.id.clone())))
        .collect()
}

/// Local tag id -> remote tag id.
pub fn local_tag_index(tags: &[Tag]) -> HashMap<TagId, String> {
    tags.iter()
        .filter_map(|t| t.remote_id.clone().map(|remote| (t.id.clone(), remote)))
        .collect()
}

fn validate_remote(theirs: &RemoteReminder) -> Result<String, ValidationError> {
    theirs.recurrence.validate()?;
    validate_title(&theirs.title)
}

fn resolve_tags(remote_tag_ids: &[String], index: &HashMap<String, TagId>) -> BTreeSet<TagId> {
    remote_tag_ids
        .iter()
        .filter_map(|remote| index.get(remote).cloned())
        .collect()
}

/// Fold remote reminders into `local`, translating tag links through
/// `tag_index` (remote tag id -> local tag id).
///
/// Invalid remote records are skipped and reported in `failures`.
pub fn merge_reminders(
    local: &mut Vec<Reminder>,
    remote: &[RemoteReminder],
    tag_index: &HashMap<String, TagId>,
    tombstoned: &HashSet<String>,
    failures: &mut Vec<EntityFailure>,
) -> MergeCounts {
    let mut counts = MergeCounts::default();
    let positions = position_by_remote_id(local.iter().map(|r| r.remote_id.as_ref()));

    for theirs in remote {
        if tombstoned.contains(&theirs.id) {
            debug!(remote_id = %theirs.id, "skipping tombstoned remote reminder");
            continue;
        }
        let title = match validate_remote(theirs) {
            Ok(title) => title,
            Err(err) => {
                warn!(remote_id = %theirs.id, error = %err, "rejecting remote reminder");
                failures.push(EntityFailure {
                    kind: EntityKind::Reminder,
                    id: theirs.id.clone(),
                    operation: SyncOperation::Accept,
                    message: err.to_string(),
                });
                continue;
            }
        };

        match positions.get(&theirs.id) {
            Some(&idx) => {
                let ours = &mut local[idx];
                if decide_merge(ours.updated_at, theirs.updated_at) == MergeDecision::UseRemote {
                    ours.title = title;
                    ours.notes = theirs.notes.clone();
                    ours.scheduled_date = theirs.scheduled_date;
                    ours.is_completed = theirs.is_completed;
                    ours.recurrence = theirs.recurrence;
                    ours.recurrence_end_date = theirs.recurrence_end_date;
                    ours.created_at = theirs.created_at;
                    ours.updated_at = theirs.updated_at;
                    ours.tag_ids = resolve_tags(&theirs.tag_ids, tag_index);
                    counts.updated_locally += 1;
                }
            }
            None => {
                local.push(Reminder {
                    id: Uuid::new_v4().to_string(),
                    remote_id: Some(theirs.id.clone()),
                    title,
                    notes: theirs.notes.clone(),
                    scheduled_date: theirs.scheduled_date,
                    is_completed: theirs.is_completed,
                    recurrence: theirs.recurrence,
                    recurrence_end_date: theirs.recurrence_end_date,
                    created_at: theirs.created_at,
                    updated_at: theirs.updated_at,
                    tag_ids: resolve_tags(&theirs.tag_ids, tag_index),
                });
                counts.created_locally += 1;
            }
        }
    }
    counts
}

pub fn tag_input(tag: &Tag) -> TagInput {
    TagInput {
        name: tag.name.clone(),
        color: tag.color.clone(),
    }
}

/// Wire body for `reminder`. Tags that never reached the remote are left out.
pub fn reminder_input(reminder: &Reminder, local_to_remote: &HashMap<TagId, String>) -> ReminderInput {
    ReminderInput {
        title: reminder.title.clone(),
        notes: reminder.notes.clone(),
        scheduled_date: reminder.scheduled_date,
        is_completed: reminder.is_completed,
        recurrence: reminder.recurrence,
        recurrence_end_date: reminder.recurrence_end_date,
        tag_ids: reminder
            .tag_ids
            .iter()
            .filter_map(|id| local_to_remote.get(id).cloned())
            .collect(),
    }
}
