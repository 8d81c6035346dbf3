//! Reminder and tag entities.

mod recurrence;

pub use recurrence::{RecurrenceRule, RuleDecodeError};

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

pub type ReminderId = String;
pub type TagId = String;

/// The two record types that sync independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Reminder,
    Tag,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Reminder => "reminder",
            EntityKind::Tag => "tag",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "reminder" => Some(EntityKind::Reminder),
            "tag" => Some(EntityKind::Tag),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A schedulable reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    /// Local id, stable for the reminder's lifetime.
    pub id: ReminderId,
    /// Assigned by the remote store on first successful push.
    pub remote_id: Option<String>,
    pub title: String,
    pub notes: Option<String>,
    /// Anchor occurrence.
    pub scheduled_date: DateTime<Utc>,
    pub is_completed: bool,
    pub recurrence: RecurrenceRule,
    /// Inclusive upper bound for generated occurrences.
    pub recurrence_end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Last-write-wins discriminator.
    pub updated_at: DateTime<Utc>,
    pub tag_ids: BTreeSet<TagId>,
}

impl Reminder {
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_recurring()
    }

    /// End date, ignored for non-recurring reminders.
    pub fn effective_end_date(&self) -> Option<DateTime<Utc>> {
        if self.is_recurring() {
            self.recurrence_end_date
        } else {
            None
        }
    }
}

/// User input for a new reminder.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReminder {
    pub title: String,
    pub notes: Option<String>,
    pub scheduled_date: DateTime<Utc>,
    pub recurrence: RecurrenceRule,
    pub recurrence_end_date: Option<DateTime<Utc>>,
    pub tag_ids: BTreeSet<TagId>,
}

impl NewReminder {
    pub fn new(title: impl Into<String>, scheduled_date: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            notes: None,
            scheduled_date,
            recurrence: RecurrenceRule::None,
            recurrence_end_date: None,
            tag_ids: BTreeSet::new(),
        }
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn recurring(mut self, rule: RecurrenceRule) -> Self {
        self.recurrence = rule;
        self
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.recurrence_end_date = Some(end);
        self
    }

    pub fn tagged(mut self, tag_id: impl Into<TagId>) -> Self {
        self.tag_ids.insert(tag_id.into());
        self
    }

    /// Validate and assign a fresh local id.
    pub fn into_reminder(self, now: DateTime<Utc>) -> Result<Reminder, ValidationError> {
        let title = validate_title(&self.title)?;
        self.recurrence.validate()?;
        Ok(Reminder {
            id: Uuid::new_v4().to_string(),
            remote_id: None,
            title,
            notes: normalize_notes(self.notes),
            scheduled_date: self.scheduled_date,
            is_completed: false,
            recurrence: self.recurrence,
            recurrence_end_date: self.recurrence_end_date,
            created_at: now,
            updated_at: now,
            tag_ids: self.tag_ids,
        })
    }
}

/// Partial edit of a reminder. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReminderPatch {
    pub title: Option<String>,
    pub notes: Option<Option<String>>,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub recurrence: Option<RecurrenceRule>,
    pub recurrence_end_date: Option<Option<DateTime<Utc>>>,
    pub is_completed: Option<bool>,
    pub tag_ids: Option<BTreeSet<TagId>>,
}

impl ReminderPatch {
    /// Apply onto `reminder`, bumping `updated_at` when anything changed.
    /// Nothing is written if validation fails.
    pub fn apply(
        self,
        reminder: &mut Reminder,
        now: DateTime<Utc>,
    ) -> Result<bool, ValidationError> {
        let title = self.title.as_deref().map(validate_title).transpose()?;
        if let Some(rule) = &self.recurrence {
            rule.validate()?;
        }

        let before = reminder.clone();
        if let Some(title) = title {
            reminder.title = title;
        }
        if let Some(notes) = self.notes {
            reminder.notes = normalize_notes(notes);
        }
        if let Some(date) = self.scheduled_date {
            reminder.scheduled_date = date;
        }
        if let Some(rule) = self.recurrence {
            reminder.recurrence = rule;
        }
        if let Some(end) = self.recurrence_end_date {
            reminder.recurrence_end_date = end;
        }
        if let Some(done) = self.is_completed {
            reminder.is_completed = done;
        }
        if let Some(tags) = self.tag_ids {
            reminder.tag_ids = tags;
        }

        let changed = *reminder != before;
        if changed {
            reminder.updated_at = now;
        }
        Ok(changed)
    }
}

/// A named, colored label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub remote_id: Option<String>,
    pub name: String,
    /// Hex color, e.g. `#3b82f6`.
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tag {
    pub fn new(
        name: &str,
        color: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            remote_id: None,
            name: validate_tag_name(name)?,
            color: color.into(),
            created_at: now,
            updated_at: now,
        })
    }
}

/// Trim and reject empty titles.
pub fn validate_title(raw: &str) -> Result<String, ValidationError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    Ok(title.to_string())
}

/// Trim and reject empty tag names.
pub fn validate_tag_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyTagName);
    }
    Ok(name.to_string())
}

fn normalize_notes(notes: Option<String>) -> Option<String> {
    notes.filter(|n| !n.trim().is_empty())
}
