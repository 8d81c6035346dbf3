//! One sync pass between the local store and the remote store.
//!
//! A pass runs in this order:
//! 1. push pending tombstones (remote deletes)
//! 2. fetch remote tags and reminders; a failure here aborts with no local change
//! 3. merge tags, then create local-only tags remotely
//! 4. merge reminders through the tag index, then create local-only reminders remotely
//! 5. optionally push local edits of already-synced records
//! 6. write the merged set back in one transaction
//! 7. record the outcome on the cursor
//! 8. reschedule alerts for the merged set
//!
//! Per-entity failures are collected and never abort siblings. Only an
//! [`AuthError`] stops the pass early; whatever merged before it is still
//! written, and alerts rescheduled, so assigned remote ids are not lost.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::cursor::SyncCursor;
use super::merge::{
    local_tag_index, merge_reminders, merge_tags, remote_tag_index, reminder_input, tag_input,
};
use super::remote::RemoteStore;
use super::types::{
    EntityFailure, RemoteReminder, RemoteTag, SyncError, SyncOperation, SyncOutcome, SyncReport,
};
use crate::alerts::AlertScheduler;
use crate::clock::Clock;
use crate::error::{AuthError, RemoteError};
use crate::model::EntityKind;
use crate::storage::{LocalStore, Snapshot};

pub struct SyncReconciler {
    cursor: Arc<SyncCursor>,
    clock: Arc<dyn Clock>,
    push_local_edits: bool,
}

/// Remote ids still waiting for a successful remote delete.
#[derive(Debug, Default)]
struct PendingDeletes {
    reminders: HashSet<String>,
    tags: HashSet<String>,
}

/// Keep a non-auth failure for the report; hand auth failures back to abort.
fn collect_failure(
    failures: &mut Vec<EntityFailure>,
    kind: EntityKind,
    id: &str,
    operation: SyncOperation,
    err: RemoteError,
) -> Result<(), AuthError> {
    match err {
        RemoteError::Auth(auth) => Err(auth),
        RemoteError::Transport(transport) => {
            warn!(%kind, id, %operation, error = %transport, "sync entity failed");
            failures.push(EntityFailure {
                kind,
                id: id.to_string(),
                operation,
                message: transport.to_string(),
            });
            Ok(())
        }
    }
}

impl SyncReconciler {
    pub fn new(cursor: Arc<SyncCursor>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cursor,
            clock,
            push_local_edits: false,
        }
    }

    /// Also push local edits of records the remote already has.
    pub fn with_push_local_edits(mut self, enabled: bool) -> Self {
        self.push_local_edits = enabled;
        self
    }

    pub fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    /// Run one pass, or return [`SyncOutcome::Skipped`] if one is running.
    pub async fn sync(
        &self,
        store: &LocalStore,
        remote: &dyn RemoteStore,
        scheduler: &AlertScheduler,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(run) = self.cursor.try_begin() else {
            debug!("sync already in flight; skipping");
            return Ok(SyncOutcome::Skipped);
        };
        info!("sync started");

        let (mut report, snapshot, stopped_by) = match self.run_pass(store, remote).await {
            Ok(done) => done,
            Err(err) => {
                warn!(error = %err, "sync aborted");
                if let Err(e) = self.cursor.record_failure(&run, store, err.to_string()) {
                    warn!(error = %e, "failed to persist sync cursor");
                }
                return Err(err);
            }
        };

        let now = self.clock.now();
        if let Some(auth) = stopped_by {
            let err = SyncError::Remote(auth.into());
            warn!(error = %err, "sync aborted after partial merge");
            if let Err(e) = self.cursor.record_failure(&run, store, err.to_string()) {
                warn!(error = %e, "failed to persist sync cursor");
            }
            scheduler.reschedule_all(&snapshot.reminders, now).await;
            return Err(err);
        }

        if let Err(e) = self
            .cursor
            .record_success(&run, store, now, report.failure_summary())
        {
            warn!(error = %e, "failed to persist sync cursor");
        }
        report.alerts = scheduler.reschedule_all(&snapshot.reminders, now).await;

        info!(
            tags = report.tags.total(),
            reminders = report.reminders.total(),
            failures = report.failures.len(),
            "sync completed"
        );
        Ok(SyncOutcome::Completed(report))
    }

    /// Returns the written snapshot, plus the auth failure that stopped the
    /// merge early, if any.
    async fn run_pass(
        &self,
        store: &LocalStore,
        remote: &dyn RemoteStore,
    ) -> Result<(SyncReport, Snapshot, Option<AuthError>), SyncError> {
        let mut report = SyncReport::default();

        let pending = self.push_tombstones(store, remote, &mut report).await?;

        let remote_tags = remote.list_tags().await?;
        let remote_reminders = remote.list_reminders().await?;
        debug!(
            tags = remote_tags.len(),
            reminders = remote_reminders.len(),
            "fetched remote records"
        );

        let mut snapshot = store.snapshot()?;
        let reconciled = self
            .reconcile(
                remote,
                &mut snapshot,
                &remote_tags,
                &remote_reminders,
                &pending,
                &mut report,
            )
            .await;

        store.replace_snapshot(&snapshot)?;
        Ok((report, snapshot, reconciled.err()))
    }

    async fn push_tombstones(
        &self,
        store: &LocalStore,
        remote: &dyn RemoteStore,
        report: &mut SyncReport,
    ) -> Result<PendingDeletes, SyncError> {
        let mut pending = PendingDeletes::default();
        for tombstone in store.list_tombstones()? {
            let result = match tombstone.kind {
                EntityKind::Reminder => remote.delete_reminder(&tombstone.remote_id).await,
                EntityKind::Tag => remote.delete_tag(&tombstone.remote_id).await,
            };
            let counts = match tombstone.kind {
                EntityKind::Reminder => &mut report.reminders,
                EntityKind::Tag => &mut report.tags,
            };
            match result {
                Ok(()) => {
                    store.clear_tombstone(tombstone.kind, &tombstone.remote_id)?;
                    counts.deleted_remotely += 1;
                }
                Err(err) if err.is_not_found() => {
                    debug!(remote_id = %tombstone.remote_id, "remote record already gone");
                    store.clear_tombstone(tombstone.kind, &tombstone.remote_id)?;
                    counts.deleted_remotely += 1;
                }
                Err(err) => {
                    collect_failure(
                        &mut report.failures,
                        tombstone.kind,
                        &tombstone.remote_id,
                        SyncOperation::Delete,
                        err,
                    )
                    .map_err(|auth| SyncError::Remote(auth.into()))?;
                    match tombstone.kind {
                        EntityKind::Reminder => pending.reminders.insert(tombstone.remote_id),
                        EntityKind::Tag => pending.tags.insert(tombstone.remote_id),
                    };
                }
            }
        }
        Ok(pending)
    }

    async fn reconcile(
        &self,
        remote: &dyn RemoteStore,
        snapshot: &mut Snapshot,
        remote_tags: &[RemoteTag],
        remote_reminders: &[RemoteReminder],
        pending: &PendingDeletes,
        report: &mut SyncReport,
    ) -> Result<(), AuthError> {
        let merged = merge_tags(
            &mut snapshot.tags,
            remote_tags,
            &pending.tags,
            &mut report.failures,
        );
        report.tags.created_locally += merged.created_locally;
        report.tags.updated_locally += merged.updated_locally;

        for tag in snapshot.tags.iter_mut().filter(|t| t.remote_id.is_none()) {
            match remote.create_tag(&tag_input(tag)).await {
                Ok(created) => {
                    tag.remote_id = Some(created.id);
                    tag.created_at = created.created_at;
                    tag.updated_at = created.updated_at;
                    report.tags.pushed += 1;
                }
                Err(err) => collect_failure(
                    &mut report.failures,
                    EntityKind::Tag,
                    &tag.id,
                    SyncOperation::Create,
                    err,
                )?,
            }
        }

        let merged = merge_reminders(
            &mut snapshot.reminders,
            remote_reminders,
            &remote_tag_index(&snapshot.tags),
            &pending.reminders,
            &mut report.failures,
        );
        report.reminders.created_locally += merged.created_locally;
        report.reminders.updated_locally += merged.updated_locally;

        let to_remote = local_tag_index(&snapshot.tags);
        for reminder in snapshot
            .reminders
            .iter_mut()
            .filter(|r| r.remote_id.is_none())
        {
            match remote
                .create_reminder(&reminder_input(reminder, &to_remote))
                .await
            {
                Ok(created) => {
                    reminder.remote_id = Some(created.id);
                    reminder.created_at = created.created_at;
                    reminder.updated_at = created.updated_at;
                    report.reminders.pushed += 1;
                }
                Err(err) => collect_failure(
                    &mut report.failures,
                    EntityKind::Reminder,
                    &reminder.id,
                    SyncOperation::Create,
                    err,
                )?,
            }
        }

        if self.push_local_edits {
            self.push_edits(remote, snapshot, remote_tags, remote_reminders, report)
                .await?;
        }
        Ok(())
    }

    /// Send local records that are newer than their remote version.
    async fn push_edits(
        &self,
        remote: &dyn RemoteStore,
        snapshot: &mut Snapshot,
        remote_tags: &[RemoteTag],
        remote_reminders: &[RemoteReminder],
        report: &mut SyncReport,
    ) -> Result<(), AuthError> {
        let tag_versions: HashMap<&str, DateTime<Utc>> = remote_tags
            .iter()
            .map(|t| (t.id.as_str(), t.updated_at))
            .collect();
        for tag in snapshot.tags.iter_mut() {
            let Some(remote_id) = tag.remote_id.clone() else {
                continue;
            };
            let Some(&theirs) = tag_versions.get(remote_id.as_str()) else {
                continue;
            };
            if tag.updated_at <= theirs {
                continue;
            }
            match remote.update_tag(&remote_id, &tag_input(tag)).await {
                Ok(updated) => {
                    tag.updated_at = updated.updated_at;
                    report.tags.edits_pushed += 1;
                }
                Err(err) => collect_failure(
                    &mut report.failures,
                    EntityKind::Tag,
                    &tag.id,
                    SyncOperation::Update,
                    err,
                )?,
            }
        }

        let reminder_versions: HashMap<&str, DateTime<Utc>> = remote_reminders
            .iter()
            .map(|r| (r.id.as_str(), r.updated_at))
            .collect();
        let to_remote = local_tag_index(&snapshot.tags);
        for reminder in snapshot.reminders.iter_mut() {
            let Some(remote_id) = reminder.remote_id.clone() else {
                continue;
            };
            let Some(&theirs) = reminder_versions.get(remote_id.as_str()) else {
                continue;
            };
            if reminder.updated_at <= theirs {
                continue;
            }
            match remote
                .update_reminder(&remote_id, &reminder_input(reminder, &to_remote))
                .await
            {
                Ok(updated) => {
                    reminder.updated_at = updated.updated_at;
                    report.reminders.edits_pushed += 1;
                }
                Err(err) => collect_failure(
                    &mut report.failures,
                    EntityKind::Reminder,
                    &reminder.id,
                    SyncOperation::Update,
                    err,
                )?,
            }
        }
        Ok(())
    }
}
