//! In-memory implementation of the QueueStore trait.
//!
//! Same semantics as SQLite but nothing survives a restart. Used in tests and
//! for tenants that do not need durable queues.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use peerdrive_core::ItemId;

use crate::error::{Result, StoreError};
use crate::traits::{DeadLetter, PopStamp, QueueEntry, QueueKind, QueueStatus, QueueStore};

/// In-memory queue store. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryQueueStore {
    inner: RwLock<MemoryQueueInner>,
}

#[derive(Default)]
struct MemoryQueueInner {
    entries: HashMap<(QueueKind, ItemId), Slot>,
    dead: Vec<DeadLetter>,
    /// Insertion counter for stable ordering.
    next_seq: u64,
}

struct Slot {
    entry: QueueEntry,
    seq: u64,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryQueueInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Internal(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryQueueInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Internal(format!("lock poisoned: {}", e)))
    }
}

impl MemoryQueueInner {
    fn reserved_mut(&mut self, kind: QueueKind, id: &ItemId, stamp: &PopStamp) -> Option<&mut Slot> {
        self.entries
            .get_mut(&(kind, *id))
            .filter(|slot| slot.entry.pop_stamp.as_ref() == Some(stamp))
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, mut entry: QueueEntry, upsert: bool) -> Result<()> {
        let mut inner = self.write()?;

        if let Some(key) = entry.dedupe_key.clone() {
            let existing = inner
                .entries
                .iter()
                .find(|((kind, _), slot)| {
                    *kind == entry.kind && slot.entry.dedupe_key.as_deref() == Some(key.as_str())
                })
                .map(|(k, _)| *k);

            if let Some(existing) = existing {
                if !upsert {
                    return Err(StoreError::Duplicate(key));
                }
                inner.entries.remove(&existing);
            }
        } else if inner.entries.contains_key(&(entry.kind, entry.id)) {
            return Err(StoreError::Duplicate(entry.id.to_hex()));
        }

        entry.pop_stamp = None;
        entry.popped_at = None;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert((entry.kind, entry.id), Slot { entry, seq });
        Ok(())
    }

    async fn pop(
        &self,
        kind: QueueKind,
        partition: Option<&str>,
        now: i64,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let mut inner = self.write()?;

        let mut due: Vec<(i64, i64, u64, ItemId)> = inner
            .entries
            .iter()
            .filter(|((k, _), slot)| {
                *k == kind
                    && slot.entry.pop_stamp.is_none()
                    && slot.entry.next_run_at <= now
                    && partition.map_or(true, |p| slot.entry.partition == p)
            })
            .map(|((_, id), slot)| (slot.entry.priority, slot.entry.next_run_at, slot.seq, *id))
            .collect();
        due.sort();
        due.truncate(limit);

        let stamp = PopStamp::random();
        let mut popped = Vec::with_capacity(due.len());
        for (_, _, _, id) in due {
            if let Some(slot) = inner.entries.get_mut(&(kind, id)) {
                slot.entry.pop_stamp = Some(stamp);
                slot.entry.popped_at = Some(now);
                popped.push(slot.entry.clone());
            }
        }
        Ok(popped)
    }

    async fn complete(&self, kind: QueueKind, id: &ItemId, stamp: &PopStamp) -> Result<bool> {
        let mut inner = self.write()?;
        if inner.reserved_mut(kind, id, stamp).is_none() {
            return Ok(false);
        }
        Ok(inner.entries.remove(&(kind, *id)).is_some())
    }

    async fn fail(
        &self,
        kind: QueueKind,
        id: &ItemId,
        stamp: &PopStamp,
        next_run_at: i64,
    ) -> Result<Option<u32>> {
        let mut inner = self.write()?;
        Ok(inner.reserved_mut(kind, id, stamp).map(|slot| {
            slot.entry.pop_stamp = None;
            slot.entry.popped_at = None;
            slot.entry.attempt_count += 1;
            slot.entry.next_run_at = next_run_at;
            slot.entry.attempt_count
        }))
    }

    async fn dead_letter(
        &self,
        kind: QueueKind,
        id: &ItemId,
        stamp: &PopStamp,
        reason: &str,
        now: i64,
    ) -> Result<bool> {
        let mut inner = self.write()?;
        if inner.reserved_mut(kind, id, stamp).is_none() {
            return Ok(false);
        }
        let Some(slot) = inner.entries.remove(&(kind, *id)) else {
            return Ok(false);
        };
        let mut entry = slot.entry;
        entry.pop_stamp = None;
        entry.popped_at = None;
        inner.dead.push(DeadLetter {
            entry,
            reason: reason.to_string(),
            dead_at: now,
        });
        Ok(true)
    }

    async fn recover(&self, kind: QueueKind, popped_before: i64) -> Result<usize> {
        let mut inner = self.write()?;
        let mut recovered = 0;
        for ((k, _), slot) in inner.entries.iter_mut() {
            if *k == kind && slot.entry.popped_at.map_or(false, |at| at < popped_before) {
                slot.entry.pop_stamp = None;
                slot.entry.popped_at = None;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn status(&self, kind: QueueKind, partition: Option<&str>) -> Result<QueueStatus> {
        let inner = self.read()?;
        let mut status = QueueStatus::default();
        for ((k, _), slot) in inner.entries.iter() {
            if *k != kind || partition.map_or(false, |p| slot.entry.partition != p) {
                continue;
            }
            status.total += 1;
            if slot.entry.pop_stamp.is_some() {
                status.popped += 1;
            }
            status.oldest_added_at = Some(match status.oldest_added_at {
                Some(oldest) => oldest.min(slot.entry.added_at),
                None => slot.entry.added_at,
            });
        }
        Ok(status)
    }

    async fn get(&self, kind: QueueKind, id: &ItemId) -> Result<Option<QueueEntry>> {
        Ok(self
            .read()?
            .entries
            .get(&(kind, *id))
            .map(|slot| slot.entry.clone()))
    }

    async fn dead_letters(&self, kind: QueueKind) -> Result<Vec<DeadLetter>> {
        Ok(self
            .read()?
            .dead
            .iter()
            .filter(|d| d.entry.kind == kind)
            .cloned()
            .collect())
    }

    async fn remove(&self, kind: QueueKind, id: &ItemId) -> Result<bool> {
        Ok(self.write()?.entries.remove(&(kind, *id)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(partition: &str, now: i64) -> QueueEntry {
        QueueEntry::new(ItemId::random(), QueueKind::Inbox, partition, vec![1, 2, 3], now)
    }

    #[tokio::test]
    async fn test_pop_reserves_and_complete_removes() {
        let store = MemoryQueueStore::new();
        let e = entry("drive-a", 100);
        store.enqueue(e.clone(), false).await.unwrap();

        let popped = store.pop(QueueKind::Inbox, None, 100, 10).await.unwrap();
        assert_eq!(popped.len(), 1);
        let stamp = popped[0].pop_stamp.unwrap();

        // Reserved entries are not handed out twice.
        assert!(store.pop(QueueKind::Inbox, None, 100, 10).await.unwrap().is_empty());

        assert!(store.complete(QueueKind::Inbox, &e.id, &stamp).await.unwrap());
        assert!(store.get(QueueKind::Inbox, &e.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_stamp_is_noop() {
        let store = MemoryQueueStore::new();
        let e = entry("drive-a", 0);
        store.enqueue(e.clone(), false).await.unwrap();
        store.pop(QueueKind::Inbox, None, 0, 1).await.unwrap();

        let bogus = PopStamp::random();
        assert!(!store.complete(QueueKind::Inbox, &e.id, &bogus).await.unwrap());
        assert_eq!(store.fail(QueueKind::Inbox, &e.id, &bogus, 10).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fail_reschedules() {
        let store = MemoryQueueStore::new();
        let e = entry("drive-a", 0);
        store.enqueue(e.clone(), false).await.unwrap();
        let stamp = store.pop(QueueKind::Inbox, None, 0, 1).await.unwrap()[0]
            .pop_stamp
            .unwrap();

        assert_eq!(
            store.fail(QueueKind::Inbox, &e.id, &stamp, 500).await.unwrap(),
            Some(1)
        );
        assert!(store.pop(QueueKind::Inbox, None, 499, 1).await.unwrap().is_empty());
        let again = store.pop(QueueKind::Inbox, None, 500, 1).await.unwrap();
        assert_eq!(again[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn test_ordering_priority_then_time() {
        let store = MemoryQueueStore::new();
        let low = entry("p", 0).with_priority(100);
        let high = entry("p", 5).with_priority(0);
        let low2 = entry("p", 1).with_priority(100);
        for e in [&low, &high, &low2] {
            store.enqueue(e.clone(), false).await.unwrap();
        }

        let popped = store.pop(QueueKind::Inbox, None, 10, 10).await.unwrap();
        let ids: Vec<ItemId> = popped.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![high.id, low.id, low2.id]);
    }

    #[tokio::test]
    async fn test_partition_filter_and_status() {
        let store = MemoryQueueStore::new();
        store.enqueue(entry("a", 10), false).await.unwrap();
        store.enqueue(entry("a", 5), false).await.unwrap();
        store.enqueue(entry("b", 1), false).await.unwrap();

        let popped = store.pop(QueueKind::Inbox, Some("a"), 10, 1).await.unwrap();
        assert_eq!(popped[0].partition, "a");

        let status = store.status(QueueKind::Inbox, Some("a")).await.unwrap();
        assert_eq!(status.total, 2);
        assert_eq!(status.popped, 1);
        assert_eq!(status.oldest_added_at, Some(5));
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_dedupe_key() {
        let store = MemoryQueueStore::new();
        let first = entry("r", 0).with_dedupe_key("file:recipient");
        store.enqueue(first.clone(), false).await.unwrap();

        let dup = entry("r", 1).with_dedupe_key("file:recipient");
        assert!(matches!(
            store.enqueue(dup.clone(), false).await,
            Err(StoreError::Duplicate(_))
        ));

        store.enqueue(dup.clone(), true).await.unwrap();
        assert!(store.get(QueueKind::Inbox, &first.id).await.unwrap().is_none());
        assert!(store.get(QueueKind::Inbox, &dup.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_recover_stale_reservations() {
        let store = MemoryQueueStore::new();
        store.enqueue(entry("a", 0), false).await.unwrap();
        store.pop(QueueKind::Inbox, None, 100, 1).await.unwrap();

        assert_eq!(store.recover(QueueKind::Inbox, 50).await.unwrap(), 0);
        assert_eq!(store.recover(QueueKind::Inbox, 101).await.unwrap(), 1);
        assert_eq!(store.pop(QueueKind::Inbox, None, 100, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter() {
        let store = MemoryQueueStore::new();
        let e = entry("a", 0);
        store.enqueue(e.clone(), false).await.unwrap();
        let stamp = store.pop(QueueKind::Inbox, None, 0, 1).await.unwrap()[0]
            .pop_stamp
            .unwrap();

        assert!(store
            .dead_letter(QueueKind::Inbox, &e.id, &stamp, "gave up", 7)
            .await
            .unwrap());
        assert!(store.get(QueueKind::Inbox, &e.id).await.unwrap().is_none());

        let dead = store.dead_letters(QueueKind::Inbox).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "gave up");
        assert!(store.dead_letters(QueueKind::Outbox).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_kinds_are_isolated() {
        let store = MemoryQueueStore::new();
        store.enqueue(entry("a", 0), false).await.unwrap();
        assert!(store.pop(QueueKind::Outbox, None, 0, 10).await.unwrap().is_empty());
    }
}
