//! SQLite-backed local store.
//!
//! Provides persistent storage for:
//! - Reminders, tags and the links between them
//! - Tombstones for records deleted locally after they reached the remote
//! - Key-value state (the sync cursor)
//!
//! The store is the source of truth for the device. Every user mutation is
//! written here before any alert or network work happens.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

use super::{data_dir, migrations};
use crate::error::StoreError;
use crate::model::{EntityKind, RecurrenceRule, Reminder, Tag, TagId};

/// A local delete the remote has not seen yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    pub kind: EntityKind,
    pub remote_id: String,
    pub deleted_at: DateTime<Utc>,
}

/// Every reminder and tag, as read or written in one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub reminders: Vec<Reminder>,
    pub tags: Vec<Tag>,
}

const REMINDER_COLUMNS: &str = "id, remote_id, title, notes, scheduled_date, is_completed,
     recurrence, recurrence_end_date, created_at, updated_at";

const TAG_COLUMNS: &str = "id, remote_id, name, color, created_at, updated_at";

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn parse_timestamp(idx: usize, raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_timestamp(row: &rusqlite::Row, idx: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

fn get_optional_timestamp(
    row: &rusqlite::Row,
    idx: usize,
) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| parse_timestamp(idx, &raw)).transpose()
}

/// Build a Reminder from a row selected with `REMINDER_COLUMNS`. Tags are
/// attached separately.
fn row_to_reminder(row: &rusqlite::Row) -> Result<Reminder, rusqlite::Error> {
    let rule_json: String = row.get(6)?;
    let recurrence = RecurrenceRule::decode(&rule_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

    Ok(Reminder {
        id: row.get(0)?,
        remote_id: row.get(1)?,
        title: row.get(2)?,
        notes: row.get(3)?,
        scheduled_date: get_timestamp(row, 4)?,
        is_completed: row.get(5)?,
        recurrence,
        recurrence_end_date: get_optional_timestamp(row, 7)?,
        created_at: get_timestamp(row, 8)?,
        updated_at: get_timestamp(row, 9)?,
        tag_ids: BTreeSet::new(),
    })
}

fn row_to_tag(row: &rusqlite::Row) -> Result<Tag, rusqlite::Error> {
    Ok(Tag {
        id: row.get(0)?,
        remote_id: row.get(1)?,
        name: row.get(2)?,
        color: row.get(3)?,
        created_at: get_timestamp(row, 4)?,
        updated_at: get_timestamp(row, 5)?,
    })
}

fn encode_rule(rule: &RecurrenceRule) -> Result<String, StoreError> {
    rule.encode().map_err(|e| StoreError::Codec {
        column: "recurrence",
        message: e.to_string(),
    })
}

/// SQLite store for reminders and tags.
pub struct LocalStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl LocalStore {
    /// Open the store at `~/.config/nudge/nudge.db`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StoreError> {
        let dir = data_dir().map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Self::open_at(&dir.join("nudge.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open an in-memory store (tests and ephemeral hosts).
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::OpenFailed {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        migrations::migrate(&conn).map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        debug!(path = ?path, "local store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// File backing the store, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // === Reminders ===

    /// All reminders ordered by scheduled date.
    pub fn list_reminders(&self) -> Result<Vec<Reminder>, StoreError> {
        let conn = self.conn();
        Self::load_reminders(&conn)
    }

    pub fn get_reminder(&self, id: &str) -> Result<Option<Reminder>, StoreError> {
        let conn = self.conn();
        let sql = format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1");
        let reminder = conn
            .query_row(&sql, params![id], row_to_reminder)
            .optional()?;
        match reminder {
            Some(mut reminder) => {
                reminder.tag_ids = Self::tag_ids_of(&conn, id)?;
                Ok(Some(reminder))
            }
            None => Ok(None),
        }
    }

    /// Insert or replace a reminder and its tag links. Links to unknown tags
    /// are dropped.
    pub fn upsert_reminder(&self, reminder: &Reminder) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        Self::write_reminder(&tx, reminder)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a reminder, leaving a tombstone if it had reached the remote.
    /// Returns the deleted record.
    pub fn delete_reminder(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, StoreError> {
        let Some(existing) = self.get_reminder(id)? else {
            return Ok(None);
        };
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM reminders WHERE id = ?1", params![id])?;
        if let Some(remote_id) = &existing.remote_id {
            Self::write_tombstone(&tx, EntityKind::Reminder, remote_id, now)?;
        }
        tx.commit()?;
        Ok(Some(existing))
    }

    fn load_reminders(conn: &Connection) -> Result<Vec<Reminder>, StoreError> {
        let mut links: HashMap<String, BTreeSet<TagId>> = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT reminder_id, tag_id FROM reminder_tags")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (reminder_id, tag_id) = row?;
                links.entry(reminder_id).or_default().insert(tag_id);
            }
        }

        let sql = format!("SELECT {REMINDER_COLUMNS} FROM reminders ORDER BY scheduled_date, id");
        let mut stmt = conn.prepare(&sql)?;
        let reminders = stmt
            .query_map([], row_to_reminder)?
            .map(|row| {
                row.map(|mut reminder| {
                    reminder.tag_ids = links.remove(&reminder.id).unwrap_or_default();
                    reminder
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reminders)
    }

    fn tag_ids_of(conn: &Connection, reminder_id: &str) -> Result<BTreeSet<TagId>, StoreError> {
        let mut stmt = conn.prepare("SELECT tag_id FROM reminder_tags WHERE reminder_id = ?1")?;
        let ids = stmt
            .query_map(params![reminder_id], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }

    fn write_reminder(tx: &Transaction, reminder: &Reminder) -> Result<(), StoreError> {
        tx.execute(
            "INSERT INTO reminders (id, remote_id, title, notes, scheduled_date, is_completed,
                                    recurrence, recurrence_end_date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                remote_id = excluded.remote_id,
                title = excluded.title,
                notes = excluded.notes,
                scheduled_date = excluded.scheduled_date,
                is_completed = excluded.is_completed,
                recurrence = excluded.recurrence,
                recurrence_end_date = excluded.recurrence_end_date,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            params![
                reminder.id,
                reminder.remote_id,
                reminder.title,
                reminder.notes,
                format_timestamp(&reminder.scheduled_date),
                reminder.is_completed,
                encode_rule(&reminder.recurrence)?,
                reminder.recurrence_end_date.as_ref().map(format_timestamp),
                format_timestamp(&reminder.created_at),
                format_timestamp(&reminder.updated_at),
            ],
        )?;
        tx.execute(
            "DELETE FROM reminder_tags WHERE reminder_id = ?1",
            params![reminder.id],
        )?;
        for tag_id in &reminder.tag_ids {
            tx.execute(
                "INSERT OR IGNORE INTO reminder_tags (reminder_id, tag_id)
                 SELECT ?1, id FROM tags WHERE id = ?2",
                params![reminder.id, tag_id],
            )?;
        }
        Ok(())
    }

    // === Tags ===

    pub fn list_tags(&self) -> Result<Vec<Tag>, StoreError> {
        let conn = self.conn();
        Self::load_tags(&conn)
    }

    pub fn get_tag(&self, id: &str) -> Result<Option<Tag>, StoreError> {
        let sql = format!("SELECT {TAG_COLUMNS} FROM tags WHERE id = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![id], row_to_tag)
            .optional()?)
    }

    pub fn upsert_tag(&self, tag: &Tag) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        Self::write_tag(&tx, tag)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a tag and unlink it from every reminder. Affected reminders get
    /// `updated_at = now` so the change wins on the next sync. Returns the
    /// deleted tag.
    pub fn delete_tag(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Tag>, StoreError> {
        let Some(existing) = self.get_tag(id)? else {
            return Ok(None);
        };
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let touched = tx.execute(
            "UPDATE reminders SET updated_at = ?1
             WHERE id IN (SELECT reminder_id FROM reminder_tags WHERE tag_id = ?2)",
            params![format_timestamp(&now), id],
        )?;
        tx.execute("DELETE FROM tags WHERE id = ?1", params![id])?;
        if let Some(remote_id) = &existing.remote_id {
            Self::write_tombstone(&tx, EntityKind::Tag, remote_id, now)?;
        }
        tx.commit()?;
        debug!(tag_id = id, reminders = touched, "tag deleted");
        Ok(Some(existing))
    }

    fn load_tags(conn: &Connection) -> Result<Vec<Tag>, StoreError> {
        let sql = format!("SELECT {TAG_COLUMNS} FROM tags ORDER BY name, id");
        let mut stmt = conn.prepare(&sql)?;
        let tags = stmt
            .query_map([], row_to_tag)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    fn write_tag(tx: &Transaction, tag: &Tag) -> Result<(), StoreError> {
        tx.execute(
            "INSERT INTO tags (id, remote_id, name, color, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                remote_id = excluded.remote_id,
                name = excluded.name,
                color = excluded.color,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            params![
                tag.id,
                tag.remote_id,
                tag.name,
                tag.color,
                format_timestamp(&tag.created_at),
                format_timestamp(&tag.updated_at),
            ],
        )?;
        Ok(())
    }

    // === Tombstones ===

    pub fn list_tombstones(&self) -> Result<Vec<Tombstone>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT kind, remote_id, deleted_at FROM tombstones ORDER BY deleted_at, remote_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let kind: String = row.get(0)?;
            let kind = EntityKind::parse(&kind).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    Type::Text,
                    format!("unknown tombstone kind '{kind}'").into(),
                )
            })?;
            Ok(Tombstone {
                kind,
                remote_id: row.get(1)?,
                deleted_at: get_timestamp(row, 2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn clear_tombstone(&self, kind: EntityKind, remote_id: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "DELETE FROM tombstones WHERE kind = ?1 AND remote_id = ?2",
            params![kind.as_str(), remote_id],
        )?;
        Ok(())
    }

    fn write_tombstone(
        tx: &Transaction,
        kind: EntityKind,
        remote_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        tx.execute(
            "INSERT OR REPLACE INTO tombstones (kind, remote_id, deleted_at) VALUES (?1, ?2, ?3)",
            params![kind.as_str(), remote_id, format_timestamp(&now)],
        )?;
        Ok(())
    }

    // === Snapshot ===

    /// Read every reminder and tag consistently.
    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let snapshot = Snapshot {
            tags: Self::load_tags(&tx)?,
            reminders: Self::load_reminders(&tx)?,
        };
        tx.commit()?;
        Ok(snapshot)
    }

    /// Replace every reminder and tag with `snapshot` in one transaction.
    /// On error the store is left as it was.
    pub fn replace_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM reminder_tags;
             DELETE FROM reminders;
             DELETE FROM tags;",
        )?;
        for tag in &snapshot.tags {
            Self::write_tag(&tx, tag)?;
        }
        for reminder in &snapshot.reminders {
            Self::write_reminder(&tx, reminder)?;
        }
        tx.commit()?;
        debug!(
            reminders = snapshot.reminders.len(),
            tags = snapshot.tags.len(),
            "snapshot replaced"
        );
        Ok(())
    }

    // === Key-value ===

    pub fn kv_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn()
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?)
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewReminder;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 2, 10, 30, 0).unwrap()
    }

    fn make_test_reminder(title: &str) -> Reminder {
        NewReminder::new(title, now() + Duration::hours(2))
            .notes("bring the form")
            .recurring(RecurrenceRule::Monthly { day: 31 })
            .until(now() + Duration::days(90))
            .into_reminder(now())
            .unwrap()
    }

    #[test]
    fn constraint_failure_keeps_sqlite_message() {
        let store = LocalStore::open_memory().unwrap();
        let mut first = make_test_reminder("First");
        first.remote_id = Some("srv-dup".into());
        let mut second = make_test_reminder("Second");
        second.remote_id = Some("srv-dup".into());
        store.upsert_reminder(&first).unwrap();

        match store.upsert_reminder(&second).unwrap_err() {
            StoreError::QueryFailed(message) => {
                assert!(message.contains("reminders.remote_id"), "{message}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn reminder_round_trip_preserves_fields() {
        let store = LocalStore::open_memory().unwrap();
        let tag = Tag::new("Errands", "#f97316", now()).unwrap();
        store.upsert_tag(&tag).unwrap();

        let mut reminder = make_test_reminder("Renew permit");
        reminder.tag_ids.insert(tag.id.clone());
        reminder.updated_at = now() + Duration::nanoseconds(123_456_789);
        store.upsert_reminder(&reminder).unwrap();

        let loaded = store.get_reminder(&reminder.id).unwrap().unwrap();
        assert_eq!(loaded, reminder);
        assert_eq!(store.list_reminders().unwrap(), vec![reminder]);
    }

    #[test]
    fn links_to_unknown_tags_are_dropped() {
        let store = LocalStore::open_memory().unwrap();
        let mut reminder = make_test_reminder("Renew permit");
        reminder.tag_ids.insert("missing".into());
        store.upsert_reminder(&reminder).unwrap();

        let loaded = store.get_reminder(&reminder.id).unwrap().unwrap();
        assert!(loaded.tag_ids.is_empty());
    }

    #[test]
    fn delete_reminder_tombstones_only_synced_records() {
        let store = LocalStore::open_memory().unwrap();
        let local_only = make_test_reminder("Local");
        let mut synced = make_test_reminder("Synced");
        synced.remote_id = Some("srv-1".into());
        store.upsert_reminder(&local_only).unwrap();
        store.upsert_reminder(&synced).unwrap();

        assert!(store.delete_reminder(&local_only.id, now()).unwrap().is_some());
        assert!(store.delete_reminder(&synced.id, now()).unwrap().is_some());
        assert!(store.delete_reminder(&synced.id, now()).unwrap().is_none());

        let tombstones = store.list_tombstones().unwrap();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].kind, EntityKind::Reminder);
        assert_eq!(tombstones[0].remote_id, "srv-1");

        store.clear_tombstone(EntityKind::Reminder, "srv-1").unwrap();
        assert!(store.list_tombstones().unwrap().is_empty());
    }

    #[test]
    fn delete_tag_unlinks_and_touches_reminders() {
        let store = LocalStore::open_memory().unwrap();
        let mut tag = Tag::new("Home", "#22c55e", now()).unwrap();
        tag.remote_id = Some("srv-tag".into());
        store.upsert_tag(&tag).unwrap();
        let mut tagged = make_test_reminder("Water plants");
        tagged.tag_ids.insert(tag.id.clone());
        let untagged = make_test_reminder("Call bank");
        store.upsert_reminder(&tagged).unwrap();
        store.upsert_reminder(&untagged).unwrap();

        let later = now() + Duration::minutes(5);
        store.delete_tag(&tag.id, later).unwrap();

        let tagged = store.get_reminder(&tagged.id).unwrap().unwrap();
        assert!(tagged.tag_ids.is_empty());
        assert_eq!(tagged.updated_at, later);
        assert_eq!(store.get_reminder(&untagged.id).unwrap().unwrap().updated_at, now());
        assert!(store.list_tags().unwrap().is_empty());
        assert_eq!(store.list_tombstones().unwrap()[0].kind, EntityKind::Tag);
    }

    #[test]
    fn deleting_reminder_keeps_tags() {
        let store = LocalStore::open_memory().unwrap();
        let tag = Tag::new("Home", "#22c55e", now()).unwrap();
        store.upsert_tag(&tag).unwrap();
        let mut reminder = make_test_reminder("Water plants");
        reminder.tag_ids.insert(tag.id.clone());
        store.upsert_reminder(&reminder).unwrap();

        store.delete_reminder(&reminder.id, now()).unwrap();
        assert_eq!(store.list_tags().unwrap(), vec![tag]);
    }

    #[test]
    fn replace_snapshot_swaps_everything() {
        let store = LocalStore::open_memory().unwrap();
        store.upsert_reminder(&make_test_reminder("Old")).unwrap();

        let tag = Tag::new("Work", "#3b82f6", now()).unwrap();
        let mut fresh = make_test_reminder("New");
        fresh.tag_ids.insert(tag.id.clone());
        let snapshot = Snapshot {
            reminders: vec![fresh],
            tags: vec![tag],
        };
        store.replace_snapshot(&snapshot).unwrap();
        assert_eq!(store.snapshot().unwrap(), snapshot);
    }

    #[test]
    fn failed_replace_leaves_store_unchanged() {
        let store = LocalStore::open_memory().unwrap();
        let original = make_test_reminder("Keep me");
        store.upsert_reminder(&original).unwrap();

        // two records sharing a remote id violate the unique index mid-write
        let mut a = make_test_reminder("A");
        let mut b = make_test_reminder("B");
        a.remote_id = Some("dup".into());
        b.remote_id = Some("dup".into());
        let result = store.replace_snapshot(&Snapshot {
            reminders: vec![a, b],
            tags: vec![],
        });
        assert!(result.is_err());
        assert_eq!(store.list_reminders().unwrap(), vec![original]);
    }

    #[test]
    fn kv_store() {
        let store = LocalStore::open_memory().unwrap();
        assert!(store.kv_get("test").unwrap().is_none());
        store.kv_set("test", "hello").unwrap();
        assert_eq!(store.kv_get("test").unwrap().unwrap(), "hello");
    }

    #[test]
    fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nudge.db");
        let reminder = make_test_reminder("Persist");
        {
            let store = LocalStore::open_at(&path).unwrap();
            store.upsert_reminder(&reminder).unwrap();
            assert_eq!(store.path(), Some(path.as_path()));
        }
        let store = LocalStore::open_at(&path).unwrap();
        assert_eq!(store.list_reminders().unwrap(), vec![reminder]);
    }
}
