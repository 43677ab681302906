//! Schema migrations for the SQLite queue store.
//!
//! Versioned and forward-only: version N+1 is applied on top of N inside a
//! single transaction, and the applied versions are recorded in
//! `schema_migrations`.

use rusqlite::Connection;

use peerdrive_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Bring the database up to [`CURRENT_VERSION`]. Safe to call repeatedly.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;
        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }
        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// v1: queue items and dead letters.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Inbox and outbox entries; rowid gives insertion order
        CREATE TABLE queue_items (
            kind TEXT NOT NULL,               -- 'inbox' | 'outbox'
            item_id BLOB NOT NULL,            -- 16 bytes
            partition_key TEXT NOT NULL,      -- drive id hex or recipient
            dedupe_key TEXT,
            priority INTEGER NOT NULL,
            added_at INTEGER NOT NULL,
            next_run_at INTEGER NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            pop_stamp BLOB,                   -- 16 bytes while reserved
            popped_at INTEGER,
            payload BLOB NOT NULL,            -- CBOR-encoded item
            PRIMARY KEY (kind, item_id)
        );

        CREATE INDEX idx_queue_due
            ON queue_items(kind, priority, next_run_at)
            WHERE pop_stamp IS NULL;
        CREATE INDEX idx_queue_partition ON queue_items(kind, partition_key);
        CREATE UNIQUE INDEX idx_queue_dedupe
            ON queue_items(kind, dedupe_key)
            WHERE dedupe_key IS NOT NULL;

        -- Entries that will not be retried
        CREATE TABLE dead_letters (
            kind TEXT NOT NULL,
            item_id BLOB NOT NULL,
            partition_key TEXT NOT NULL,
            dedupe_key TEXT,
            priority INTEGER NOT NULL,
            added_at INTEGER NOT NULL,
            attempt_count INTEGER NOT NULL,
            payload BLOB NOT NULL,
            reason TEXT NOT NULL,
            dead_at INTEGER NOT NULL
        );

        CREATE INDEX idx_dead_kind ON dead_letters(kind, dead_at);
        "#,
    )?;
    Ok(())
}
