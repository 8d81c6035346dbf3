//! In-process remote store for tests and offline hosts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::remote::RemoteStore;
use super::types::{ReminderInput, RemoteReminder, RemoteTag, TagInput};
use crate::clock::Clock;
use crate::error::{AuthError, RemoteError, TransportError};

#[derive(Debug, Default)]
struct MemoryRemoteState {
    reminders: BTreeMap<String, RemoteReminder>,
    tags: BTreeMap<String, RemoteTag>,
    next_id: u64,
    failing_names: BTreeSet<String>,
    fail_listing: bool,
    unauthorized: bool,
    unauthorized_writes: bool,
    creates: usize,
    updates: usize,
    deletes: Vec<String>,
}

/// A remote store that keeps records in memory and stamps them with the
/// injected clock, like a server would.
pub struct MemoryRemoteStore {
    clock: Arc<dyn Clock>,
    state: Mutex<MemoryRemoteState>,
}

impl MemoryRemoteStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(MemoryRemoteState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryRemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make creates and updates of records with this title or name fail with 500.
    pub fn fail_writes_for(&self, title_or_name: impl Into<String>) {
        self.lock().failing_names.insert(title_or_name.into());
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.lock().fail_listing = fail;
    }

    /// Answer every call as if the gate gave up.
    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.lock().unauthorized = unauthorized;
    }

    /// Answer creates and updates as if the gate gave up; listing still works.
    pub fn set_unauthorized_writes(&self, unauthorized: bool) {
        self.lock().unauthorized_writes = unauthorized;
    }

    /// Seed or overwrite a record as another device would.
    pub fn put_reminder(&self, reminder: RemoteReminder) {
        self.lock().reminders.insert(reminder.id.clone(), reminder);
    }

    pub fn put_tag(&self, tag: RemoteTag) {
        self.lock().tags.insert(tag.id.clone(), tag);
    }

    pub fn reminders(&self) -> Vec<RemoteReminder> {
        self.lock().reminders.values().cloned().collect()
    }

    pub fn reminder(&self, id: &str) -> Option<RemoteReminder> {
        self.lock().reminders.get(id).cloned()
    }

    pub fn tags(&self) -> Vec<RemoteTag> {
        self.lock().tags.values().cloned().collect()
    }

    pub fn create_calls(&self) -> usize {
        self.lock().creates
    }

    pub fn update_calls(&self) -> usize {
        self.lock().updates
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.lock().deletes.clone()
    }

    fn check_auth(state: &MemoryRemoteState) -> Result<(), RemoteError> {
        if state.unauthorized {
            return Err(AuthError::Unauthorized.into());
        }
        Ok(())
    }

    fn check_write(state: &MemoryRemoteState, name: &str) -> Result<(), RemoteError> {
        Self::check_auth(state)?;
        if state.unauthorized_writes {
            return Err(AuthError::Unauthorized.into());
        }
        if state.failing_names.contains(name) {
            return Err(TransportError::Status {
                status: 500,
                body: format!("cannot store '{name}'"),
            }
            .into());
        }
        Ok(())
    }

    fn check_list(state: &MemoryRemoteState) -> Result<(), RemoteError> {
        Self::check_auth(state)?;
        if state.fail_listing {
            return Err(TransportError::Status {
                status: 503,
                body: "unavailable".into(),
            }
            .into());
        }
        Ok(())
    }

    fn allocate_id(state: &mut MemoryRemoteState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}-{}", state.next_id)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn list_reminders(&self) -> Result<Vec<RemoteReminder>, RemoteError> {
        let state = self.lock();
        Self::check_list(&state)?;
        Ok(state.reminders.values().cloned().collect())
    }

    async fn create_reminder(&self, input: &ReminderInput) -> Result<RemoteReminder, RemoteError> {
        let now = self.clock.now();
        let mut state = self.lock();
        Self::check_write(&state, &input.title)?;
        state.creates += 1;
        let id = Self::allocate_id(&mut state, "srv-r");
        let record = RemoteReminder {
            id: id.clone(),
            title: input.title.clone(),
            notes: input.notes.clone(),
            scheduled_date: input.scheduled_date,
            is_completed: input.is_completed,
            recurrence: input.recurrence,
            recurrence_end_date: input.recurrence_end_date,
            created_at: now,
            updated_at: now,
            tag_ids: input.tag_ids.clone(),
        };
        state.reminders.insert(id, record.clone());
        Ok(record)
    }

    async fn update_reminder(
        &self,
        id: &str,
        input: &ReminderInput,
    ) -> Result<RemoteReminder, RemoteError> {
        let now = self.clock.now();
        let mut state = self.lock();
        Self::check_write(&state, &input.title)?;
        state.updates += 1;
        let record = state
            .reminders
            .get_mut(id)
            .ok_or(RemoteError::Transport(TransportError::NotFound))?;
        record.title = input.title.clone();
        record.notes = input.notes.clone();
        record.scheduled_date = input.scheduled_date;
        record.is_completed = input.is_completed;
        record.recurrence = input.recurrence;
        record.recurrence_end_date = input.recurrence_end_date;
        record.tag_ids = input.tag_ids.clone();
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn delete_reminder(&self, id: &str) -> Result<(), RemoteError> {
        let mut state = self.lock();
        Self::check_auth(&state)?;
        state.deletes.push(id.to_string());
        state
            .reminders
            .remove(id)
            .map(|_| ())
            .ok_or(TransportError::NotFound.into())
    }

    async fn list_tags(&self) -> Result<Vec<RemoteTag>, RemoteError> {
        let state = self.lock();
        Self::check_list(&state)?;
        Ok(state.tags.values().cloned().collect())
    }

    async fn create_tag(&self, input: &TagInput) -> Result<RemoteTag, RemoteError> {
        let now = self.clock.now();
        let mut state = self.lock();
        Self::check_write(&state, &input.name)?;
        state.creates += 1;
        let id = Self::allocate_id(&mut state, "srv-t");
        let record = RemoteTag {
            id: id.clone(),
            name: input.name.clone(),
            color: input.color.clone(),
            created_at: now,
            updated_at: now,
        };
        state.tags.insert(id, record.clone());
        Ok(record)
    }

    async fn update_tag(&self, id: &str, input: &TagInput) -> Result<RemoteTag, RemoteError> {
        let now = self.clock.now();
        let mut state = self.lock();
        Self::check_write(&state, &input.name)?;
        state.updates += 1;
        let record = state
            .tags
            .get_mut(id)
            .ok_or(RemoteError::Transport(TransportError::NotFound))?;
        record.name = input.name.clone();
        record.color = input.color.clone();
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn delete_tag(&self, id: &str) -> Result<(), RemoteError> {
        let mut state = self.lock();
        Self::check_auth(&state)?;
        state.deletes.push(id.to_string());
        let removed = state.tags.remove(id);
        // the server unlinks the tag from its reminders
        for reminder in state.reminders.values_mut() {
            reminder.tag_ids.retain(|tag_id| tag_id != id);
        }
        removed
            .map(|_| ())
            .ok_or(TransportError::NotFound.into())
    }
}
