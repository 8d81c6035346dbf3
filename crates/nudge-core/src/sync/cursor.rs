//! Process-wide sync cursor.
//!
//! Serializes sync passes and remembers how the last one ended. The
//! completion time and error survive restarts through the store's kv table;
//! the in-flight flag lives in memory only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;
use crate::storage::LocalStore;

const CURSOR_KEY: &str = "sync_cursor";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PersistedCursor {
    last_sync_completed_at: Option<DateTime<Utc>>,
    last_sync_error: Option<String>,
}

/// Current sync status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Last successful sync timestamp.
    pub last_sync_completed_at: Option<DateTime<Utc>>,
    /// Whether a sync is currently in progress.
    pub is_sync_in_flight: bool,
    pub last_sync_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct SyncCursor {
    in_flight: AtomicBool,
    persisted: Mutex<PersistedCursor>,
}

/// Held for the duration of one pass. Dropping it releases the cursor.
#[derive(Debug)]
pub struct SyncRun<'a> {
    cursor: &'a SyncCursor,
}

impl Drop for SyncRun<'_> {
    fn drop(&mut self) {
        self.cursor.in_flight.store(false, Ordering::Release);
    }
}

impl SyncCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore the last outcome from `store`. A corrupt entry starts fresh.
    pub fn load(store: &LocalStore) -> Result<Self, StoreError> {
        let persisted = match store.kv_get(CURSOR_KEY)? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "discarding unreadable sync cursor");
                PersistedCursor::default()
            }),
            None => PersistedCursor::default(),
        };
        Ok(Self {
            in_flight: AtomicBool::new(false),
            persisted: Mutex::new(persisted),
        })
    }

    pub fn status(&self) -> SyncStatus {
        let persisted = self.lock();
        SyncStatus {
            last_sync_completed_at: persisted.last_sync_completed_at,
            is_sync_in_flight: self.in_flight.load(Ordering::Acquire),
            last_sync_error: persisted.last_sync_error.clone(),
        }
    }

    /// Claim the cursor, or `None` if a pass is already running.
    pub fn try_begin(&self) -> Option<SyncRun<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncRun { cursor: self })
    }

    /// Record a completed pass. `partial_failure` summarizes entities that
    /// failed without aborting the pass.
    pub fn record_success(
        &self,
        _run: &SyncRun<'_>,
        store: &LocalStore,
        completed_at: DateTime<Utc>,
        partial_failure: Option<String>,
    ) -> Result<(), StoreError> {
        let mut persisted = self.lock();
        persisted.last_sync_completed_at = Some(completed_at);
        persisted.last_sync_error = partial_failure;
        Self::persist(store, &persisted)
    }

    /// Record an aborted pass. The last completion time is kept.
    pub fn record_failure(
        &self,
        _run: &SyncRun<'_>,
        store: &LocalStore,
        message: String,
    ) -> Result<(), StoreError> {
        let mut persisted = self.lock();
        persisted.last_sync_error = Some(message);
        Self::persist(store, &persisted)
    }

    fn persist(store: &LocalStore, persisted: &PersistedCursor) -> Result<(), StoreError> {
        let raw = serde_json::to_string(persisted).map_err(|e| StoreError::Codec {
            column: "kv.sync_cursor",
            message: e.to_string(),
        })?;
        store.kv_set(CURSOR_KEY, &raw)
    }

    fn lock(&self) -> MutexGuard<'_, PersistedCursor> {
        self.persisted.lock().unwrap_or_else(|e| e.into_inner())
    }
}
