//! QueueStore trait: the abstract interface for persisted work queues.
//!
//! Both the transit inbox and the outbox are instances of the same queue
//! semantics, distinguished by [`QueueKind`]. Entries are reserved with a
//! [`PopStamp`] while a worker processes them; the stamp must be presented to
//! complete, fail, or dead-letter the entry.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use peerdrive_core::ItemId;

use crate::error::Result;

/// Which queue an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueKind {
    /// Received transfers waiting to be applied, partitioned by drive.
    Inbox,
    /// Outgoing deliveries, partitioned by recipient.
    Outbox,
}

impl QueueKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Inbox => "inbox",
            QueueKind::Outbox => "outbox",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbox" => Some(QueueKind::Inbox),
            "outbox" => Some(QueueKind::Outbox),
            _ => None,
        }
    }
}

/// Reservation marker handed out by [`QueueStore::pop`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PopStamp(pub [u8; 16]);

impl PopStamp {
    pub fn random() -> Self {
        Self(rand::thread_rng().gen())
    }
}

impl fmt::Debug for PopStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PopStamp({:02x}{:02x}{:02x}{:02x})", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: ItemId,
    pub kind: QueueKind,
    /// Drive id (inbox) or recipient (outbox).
    pub partition: String,
    /// Entries sharing a dedupe key are replaced on upsert.
    pub dedupe_key: Option<String>,
    /// Lower runs first.
    pub priority: i64,
    pub added_at: i64,
    pub next_run_at: i64,
    pub attempt_count: u32,
    pub pop_stamp: Option<PopStamp>,
    pub popped_at: Option<i64>,
    /// Encoded item.
    pub payload: Vec<u8>,
}

impl QueueEntry {
    /// A fresh, immediately runnable entry.
    pub fn new(id: ItemId, kind: QueueKind, partition: impl Into<String>, payload: Vec<u8>, now: i64) -> Self {
        Self {
            id,
            kind,
            partition: partition.into(),
            dedupe_key: None,
            priority: 0,
            added_at: now,
            next_run_at: now,
            attempt_count: 0,
            pop_stamp: None,
            popped_at: None,
            payload,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }
}

/// Queue depth snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    pub total: usize,
    pub popped: usize,
    pub oldest_added_at: Option<i64>,
}

/// An entry that exhausted its retries or could never succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub entry: QueueEntry,
    pub reason: String,
    pub dead_at: i64,
}

/// Async interface for queue persistence.
///
/// Ordering for [`pop`](Self::pop) is priority ascending, then next-run
/// ascending, then insertion order. Only entries that are not reserved and
/// whose next-run time has passed are eligible.
#[async_trait]
pub trait QueueStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Producing
    // ─────────────────────────────────────────────────────────────────────────

    /// Add an entry.
    ///
    /// With `upsert`, an existing entry with the same dedupe key is replaced
    /// (attempts reset, any reservation dropped). Without it, such a collision
    /// is [`StoreError::Duplicate`](crate::StoreError::Duplicate).
    async fn enqueue(&self, entry: QueueEntry, upsert: bool) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Consuming
    // ─────────────────────────────────────────────────────────────────────────

    /// Reserve up to `limit` due entries, optionally within one partition.
    async fn pop(
        &self,
        kind: QueueKind,
        partition: Option<&str>,
        now: i64,
        limit: usize,
    ) -> Result<Vec<QueueEntry>>;

    /// Delete a reserved entry. `false` if the stamp no longer matches.
    async fn complete(&self, kind: QueueKind, id: &ItemId, stamp: &PopStamp) -> Result<bool>;

    /// Release a reserved entry for a later attempt.
    ///
    /// Returns the new attempt count, or `None` if the stamp no longer matches.
    async fn fail(
        &self,
        kind: QueueKind,
        id: &ItemId,
        stamp: &PopStamp,
        next_run_at: i64,
    ) -> Result<Option<u32>>;

    /// Move a reserved entry to the dead-letter table.
    async fn dead_letter(
        &self,
        kind: QueueKind,
        id: &ItemId,
        stamp: &PopStamp,
        reason: &str,
        now: i64,
    ) -> Result<bool>;

    /// Release reservations taken before `popped_before`.
    async fn recover(&self, kind: QueueKind, popped_before: i64) -> Result<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    async fn status(&self, kind: QueueKind, partition: Option<&str>) -> Result<QueueStatus>;

    async fn get(&self, kind: QueueKind, id: &ItemId) -> Result<Option<QueueEntry>>;

    async fn dead_letters(&self, kind: QueueKind) -> Result<Vec<DeadLetter>>;

    /// Remove an entry regardless of reservation.
    async fn remove(&self, kind: QueueKind, id: &ItemId) -> Result<bool>;
}
