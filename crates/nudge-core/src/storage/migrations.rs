//! Database schema migrations for the local store.
//!
//! Migrations are versioned and applied automatically when opening the store.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};
use tracing::{debug, warn};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);
    if current_version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: reminders, tags, their links, tombstones and the kv table.
///
/// Timestamps are RFC 3339 text; recurrence rules are tagged JSON.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS reminders (
            id                  TEXT PRIMARY KEY,
            remote_id           TEXT UNIQUE,
            title               TEXT NOT NULL,
            notes               TEXT,
            scheduled_date      TEXT NOT NULL,
            is_completed        INTEGER NOT NULL DEFAULT 0,
            recurrence          TEXT NOT NULL,
            recurrence_end_date TEXT,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tags (
            id         TEXT PRIMARY KEY,
            remote_id  TEXT UNIQUE,
            name       TEXT NOT NULL,
            color      TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS reminder_tags (
            reminder_id TEXT NOT NULL REFERENCES reminders(id) ON DELETE CASCADE,
            tag_id      TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            PRIMARY KEY (reminder_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS tombstones (
            kind       TEXT NOT NULL,
            remote_id  TEXT NOT NULL,
            deleted_at TEXT NOT NULL,
            PRIMARY KEY (kind, remote_id)
        );

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_reminders_scheduled_date ON reminders(scheduled_date);
        CREATE INDEX IF NOT EXISTS idx_reminder_tags_tag_id ON reminder_tags(tag_id);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()?;
    debug!("applied store migration v1");
    Ok(())
}
