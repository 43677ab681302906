//! SQLite implementation of the QueueStore trait.
//!
//! The durable backend for tenant inboxes and outboxes. rusqlite with bundled
//! SQLite, driven from async code through `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use peerdrive_core::ItemId;

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{DeadLetter, PopStamp, QueueEntry, QueueKind, QueueStatus, QueueStore};

/// SQLite-backed queue store.
///
/// One connection behind a mutex; every call hops onto the blocking pool.
pub struct SqliteQueueStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteQueueStore {
    /// Open (or create) a database file and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("spawn_blocking failed: {}", e)))?
    }
}

const ENTRY_COLUMNS: &str = "kind, item_id, partition_key, dedupe_key, priority, added_at, \
     next_run_at, attempt_count, pop_stamp, popped_at, payload";

fn blob_16(row: &Row<'_>, column: &str) -> rusqlite::Result<[u8; 16]> {
    let bytes: Vec<u8> = row.get(column)?;
    bytes.try_into().map_err(|_| {
        rusqlite::Error::InvalidColumnType(0, column.to_string(), rusqlite::types::Type::Blob)
    })
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    let kind: String = row.get("kind")?;
    let kind = QueueKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(0, "kind".into(), rusqlite::types::Type::Text)
    })?;
    let pop_stamp = match row.get::<_, Option<Vec<u8>>>("pop_stamp")? {
        Some(_) => Some(PopStamp(blob_16(row, "pop_stamp")?)),
        None => None,
    };

    Ok(QueueEntry {
        id: ItemId::from_bytes(blob_16(row, "item_id")?),
        kind,
        partition: row.get("partition_key")?,
        dedupe_key: row.get("dedupe_key")?,
        priority: row.get("priority")?,
        added_at: row.get("added_at")?,
        next_run_at: row.get("next_run_at")?,
        attempt_count: row.get("attempt_count")?,
        pop_stamp,
        popped_at: row.get("popped_at")?,
        payload: row.get("payload")?,
    })
}

fn is_reserved_by(conn: &Connection, kind: QueueKind, id: &ItemId, stamp: &PopStamp) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM queue_items WHERE kind = ?1 AND item_id = ?2 AND pop_stamp = ?3",
            params![kind.as_str(), id.as_bytes().as_slice(), stamp.0.as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn enqueue(&self, entry: QueueEntry, upsert: bool) -> Result<()> {
        self.run(move |conn| {
            let tx = conn.transaction()?;

            if let Some(key) = &entry.dedupe_key {
                let existing: Option<Vec<u8>> = tx
                    .query_row(
                        "SELECT item_id FROM queue_items WHERE kind = ?1 AND dedupe_key = ?2",
                        params![entry.kind.as_str(), key],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(existing) = existing {
                    if !upsert {
                        return Err(StoreError::Duplicate(key.clone()));
                    }
                    tx.execute(
                        "DELETE FROM queue_items WHERE kind = ?1 AND item_id = ?2",
                        params![entry.kind.as_str(), existing],
                    )?;
                }
            }

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM queue_items WHERE kind = ?1 AND item_id = ?2",
                    params![entry.kind.as_str(), entry.id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Err(StoreError::Duplicate(entry.id.to_hex()));
            }

            tx.execute(
                "INSERT INTO queue_items (
                    kind, item_id, partition_key, dedupe_key, priority, added_at,
                    next_run_at, attempt_count, pop_stamp, popped_at, payload
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL, ?9)",
                params![
                    entry.kind.as_str(),
                    entry.id.as_bytes().as_slice(),
                    entry.partition,
                    entry.dedupe_key,
                    entry.priority,
                    entry.added_at,
                    entry.next_run_at,
                    entry.attempt_count,
                    entry.payload,
                ],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn pop(
        &self,
        kind: QueueKind,
        partition: Option<&str>,
        now: i64,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let partition = partition.map(str::to_string);
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let stamp = PopStamp::random();

            let mut entries = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {} FROM queue_items
                     WHERE kind = ?1 AND pop_stamp IS NULL AND next_run_at <= ?2
                       AND (?3 IS NULL OR partition_key = ?3)
                     ORDER BY priority ASC, next_run_at ASC, rowid ASC
                     LIMIT ?4",
                    ENTRY_COLUMNS
                ))?;
                let rows = stmt.query_map(
                    params![kind.as_str(), now, partition, limit as i64],
                    row_to_entry,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            for entry in entries.iter_mut() {
                tx.execute(
                    "UPDATE queue_items SET pop_stamp = ?1, popped_at = ?2
                     WHERE kind = ?3 AND item_id = ?4",
                    params![
                        stamp.0.as_slice(),
                        now,
                        kind.as_str(),
                        entry.id.as_bytes().as_slice()
                    ],
                )?;
                entry.pop_stamp = Some(stamp);
                entry.popped_at = Some(now);
            }

            tx.commit()?;
            Ok(entries)
        })
        .await
    }

    async fn complete(&self, kind: QueueKind, id: &ItemId, stamp: &PopStamp) -> Result<bool> {
        let (id, stamp) = (*id, *stamp);
        self.run(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM queue_items WHERE kind = ?1 AND item_id = ?2 AND pop_stamp = ?3",
                params![kind.as_str(), id.as_bytes().as_slice(), stamp.0.as_slice()],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn fail(
        &self,
        kind: QueueKind,
        id: &ItemId,
        stamp: &PopStamp,
        next_run_at: i64,
    ) -> Result<Option<u32>> {
        let (id, stamp) = (*id, *stamp);
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE queue_items
                 SET pop_stamp = NULL, popped_at = NULL,
                     attempt_count = attempt_count + 1, next_run_at = ?1
                 WHERE kind = ?2 AND item_id = ?3 AND pop_stamp = ?4",
                params![next_run_at, kind.as_str(), id.as_bytes().as_slice(), stamp.0.as_slice()],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            let attempts: u32 = tx.query_row(
                "SELECT attempt_count FROM queue_items WHERE kind = ?1 AND item_id = ?2",
                params![kind.as_str(), id.as_bytes().as_slice()],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(Some(attempts))
        })
        .await
    }

    async fn dead_letter(
        &self,
        kind: QueueKind,
        id: &ItemId,
        stamp: &PopStamp,
        reason: &str,
        now: i64,
    ) -> Result<bool> {
        let (id, stamp, reason) = (*id, *stamp, reason.to_string());
        self.run(move |conn| {
            let tx = conn.transaction()?;
            if !is_reserved_by(&tx, kind, &id, &stamp)? {
                return Ok(false);
            }

            tx.execute(
                "INSERT INTO dead_letters (
                    kind, item_id, partition_key, dedupe_key, priority, added_at,
                    attempt_count, payload, reason, dead_at
                )
                SELECT kind, item_id, partition_key, dedupe_key, priority, added_at,
                       attempt_count, payload, ?1, ?2
                FROM queue_items WHERE kind = ?3 AND item_id = ?4",
                params![reason, now, kind.as_str(), id.as_bytes().as_slice()],
            )?;
            tx.execute(
                "DELETE FROM queue_items WHERE kind = ?1 AND item_id = ?2",
                params![kind.as_str(), id.as_bytes().as_slice()],
            )?;

            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn recover(&self, kind: QueueKind, popped_before: i64) -> Result<usize> {
        self.run(move |conn| {
            let released = conn.execute(
                "UPDATE queue_items SET pop_stamp = NULL, popped_at = NULL
                 WHERE kind = ?1 AND pop_stamp IS NOT NULL AND popped_at < ?2",
                params![kind.as_str(), popped_before],
            )?;
            Ok(released)
        })
        .await
    }

    async fn status(&self, kind: QueueKind, partition: Option<&str>) -> Result<QueueStatus> {
        let partition = partition.map(str::to_string);
        self.run(move |conn| {
            let (total, popped, oldest): (i64, i64, Option<i64>) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN pop_stamp IS NOT NULL THEN 1 ELSE 0 END), 0),
                        MIN(added_at)
                 FROM queue_items
                 WHERE kind = ?1 AND (?2 IS NULL OR partition_key = ?2)",
                params![kind.as_str(), partition],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            Ok(QueueStatus {
                total: total as usize,
                popped: popped as usize,
                oldest_added_at: oldest,
            })
        })
        .await
    }

    async fn get(&self, kind: QueueKind, id: &ItemId) -> Result<Option<QueueEntry>> {
        let id = *id;
        self.run(move |conn| {
            let entry = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM queue_items WHERE kind = ?1 AND item_id = ?2",
                        ENTRY_COLUMNS
                    ),
                    params![kind.as_str(), id.as_bytes().as_slice()],
                    row_to_entry,
                )
                .optional()?;
            Ok(entry)
        })
        .await
    }

    async fn dead_letters(&self, kind: QueueKind) -> Result<Vec<DeadLetter>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, item_id, partition_key, dedupe_key, priority, added_at,
                        added_at AS next_run_at, attempt_count,
                        NULL AS pop_stamp, NULL AS popped_at, payload, reason, dead_at
                 FROM dead_letters WHERE kind = ?1
                 ORDER BY dead_at ASC, rowid ASC",
            )?;
            let rows = stmt.query_map(params![kind.as_str()], |row| {
                Ok(DeadLetter {
                    entry: row_to_entry(row)?,
                    reason: row.get("reason")?,
                    dead_at: row.get("dead_at")?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn remove(&self, kind: QueueKind, id: &ItemId) -> Result<bool> {
        let id = *id;
        self.run(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM queue_items WHERE kind = ?1 AND item_id = ?2",
                params![kind.as_str(), id.as_bytes().as_slice()],
            )?;
            Ok(deleted > 0)
        })
        .await
    }
}
