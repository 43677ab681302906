//! Typed views over a [`QueueStore`].
//!
//! Items are CBOR-encoded into the entry payload on the way in and decoded on
//! the way out. An entry that no longer decodes is dead-lettered on pop rather
//! than handed to a worker.

use std::marker::PhantomData;
use std::sync::Arc;

use peerdrive_core::ItemId;

use crate::error::{Result, StoreError};
use crate::items::{OutboxItem, QueueItem, TransferInboxItem};
use crate::traits::{DeadLetter, PopStamp, QueueEntry, QueueStatus, QueueStore};

/// An item reserved by a worker.
#[derive(Debug, Clone)]
pub struct Popped<T> {
    pub item: T,
    pub stamp: PopStamp,
    /// Failures recorded before this attempt.
    pub attempt_count: u32,
}

/// Queue of `T` backed by a shared store.
pub struct TypedQueue<S, T> {
    store: Arc<S>,
    _item: PhantomData<fn() -> T>,
}

/// Received transfers awaiting processing.
pub type Inbox<S> = TypedQueue<S, TransferInboxItem>;

/// Outgoing deliveries.
pub type Outbox<S> = TypedQueue<S, OutboxItem>;

impl<S, T> Clone for TypedQueue<S, T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _item: PhantomData,
        }
    }
}

pub(crate) fn encode<T: QueueItem>(item: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(item, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn decode<T: QueueItem>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl<S: QueueStore, T: QueueItem> TypedQueue<S, T> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            _item: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Add an item. With `upsert`, an item sharing its dedupe key is replaced.
    pub async fn push(&self, item: &T, upsert: bool) -> Result<()> {
        let mut entry = QueueEntry::new(
            item.id(),
            T::KIND,
            item.partition(),
            encode(item)?,
            item.added(),
        )
        .with_priority(item.priority());
        entry.dedupe_key = item.dedupe_key();
        self.store.enqueue(entry, upsert).await
    }

    /// Reserve up to `limit` due items.
    pub async fn pop(&self, partition: Option<&str>, now: i64, limit: usize) -> Result<Vec<Popped<T>>> {
        let entries = self.store.pop(T::KIND, partition, now, limit).await?;
        let mut popped = Vec::with_capacity(entries.len());

        for entry in entries {
            let Some(stamp) = entry.pop_stamp else {
                continue;
            };
            match decode::<T>(&entry.payload) {
                Ok(item) => popped.push(Popped {
                    item,
                    stamp,
                    attempt_count: entry.attempt_count,
                }),
                Err(e) => {
                    tracing::warn!(id = %entry.id, kind = T::KIND.as_str(), error = %e, "undecodable queue entry");
                    self.store
                        .dead_letter(T::KIND, &entry.id, &stamp, &e.to_string(), now)
                        .await?;
                }
            }
        }
        Ok(popped)
    }

    pub async fn complete(&self, popped: &Popped<T>) -> Result<bool> {
        self.store
            .complete(T::KIND, &popped.item.id(), &popped.stamp)
            .await
    }

    pub async fn fail(&self, popped: &Popped<T>, next_run_at: i64) -> Result<Option<u32>> {
        self.store
            .fail(T::KIND, &popped.item.id(), &popped.stamp, next_run_at)
            .await
    }

    pub async fn dead_letter(&self, popped: &Popped<T>, reason: &str, now: i64) -> Result<bool> {
        self.store
            .dead_letter(T::KIND, &popped.item.id(), &popped.stamp, reason, now)
            .await
    }

    pub async fn recover(&self, popped_before: i64) -> Result<usize> {
        self.store.recover(T::KIND, popped_before).await
    }

    pub async fn status(&self, partition: Option<&str>) -> Result<QueueStatus> {
        self.store.status(T::KIND, partition).await
    }

    pub async fn get(&self, id: &ItemId) -> Result<Option<T>> {
        match self.store.get(T::KIND, id).await? {
            Some(entry) => Ok(Some(decode(&entry.payload)?)),
            None => Ok(None),
        }
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.store.dead_letters(T::KIND).await
    }

    /// Decode a dead letter's payload back into an item.
    pub fn decode_dead_letter(&self, dead: &DeadLetter) -> Result<T> {
        decode(&dead.entry.payload)
    }

    pub async fn remove(&self, id: &ItemId) -> Result<bool> {
        self.store.remove(T::KIND, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::OutboxItemKind;
    use crate::memory::MemoryQueueStore;
    use crate::traits::QueueKind;
    use peerdrive_core::{
        DriveId, FileId, FileSystemType, IdentityId, InternalDriveFileId, TransferInstructionType,
    };

    fn inbox_item(drive: DriveId, added: i64) -> TransferInboxItem {
        TransferInboxItem::new(
            IdentityId::new("alice.example").unwrap(),
            drive,
            TransferInstructionType::SaveFile,
            FileSystemType::Standard,
            added,
        )
        .with_temp_file(FileId::random())
    }

    #[tokio::test]
    async fn test_push_pop_complete() {
        let store = Arc::new(MemoryQueueStore::new());
        let inbox: Inbox<_> = TypedQueue::new(store);
        let drive = DriveId::random();
        let item = inbox_item(drive, 10);

        inbox.push(&item, false).await.unwrap();
        assert_eq!(inbox.get(&item.id).await.unwrap(), Some(item.clone()));

        let popped = inbox.pop(Some(&drive.to_hex()), 10, 5).await.unwrap();
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].item, item);
        assert_eq!(popped[0].attempt_count, 0);

        assert!(inbox.complete(&popped[0]).await.unwrap());
        assert_eq!(inbox.status(None).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_outbox_upsert_replaces_pending_delivery() {
        let store = Arc::new(MemoryQueueStore::new());
        let outbox: Outbox<_> = TypedQueue::new(store);
        let file = InternalDriveFileId {
            drive_id: DriveId::random(),
            file_id: FileId::random(),
        };
        let recipient = IdentityId::new("bob.example").unwrap();

        let first = OutboxItem::new(file, recipient.clone(), OutboxItemKind::File, vec![1], 0);
        let second = OutboxItem::new(file, recipient.clone(), OutboxItemKind::File, vec![2], 1);
        outbox.push(&first, true).await.unwrap();
        outbox.push(&second, true).await.unwrap();

        let status = outbox.status(Some("bob.example")).await.unwrap();
        assert_eq!(status.total, 1);
        assert_eq!(outbox.get(&second.id).await.unwrap().unwrap().state, vec![2]);
    }

    #[tokio::test]
    async fn test_undecodable_entries_are_dead_lettered() {
        let store = Arc::new(MemoryQueueStore::new());
        let junk = QueueEntry::new(ItemId::random(), QueueKind::Inbox, "d", vec![0xff, 0x00], 0);
        store.enqueue(junk.clone(), false).await.unwrap();

        let inbox: Inbox<_> = TypedQueue::new(store.clone());
        assert!(inbox.pop(None, 0, 10).await.unwrap().is_empty());

        let dead = inbox.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].entry.id, junk.id);
    }

    #[tokio::test]
    async fn test_fail_counts_attempts() {
        let store = Arc::new(MemoryQueueStore::new());
        let inbox: Inbox<_> = TypedQueue::new(store);
        inbox.push(&inbox_item(DriveId::random(), 0), false).await.unwrap();

        let popped = inbox.pop(None, 0, 1).await.unwrap().remove(0);
        assert_eq!(inbox.fail(&popped, 10).await.unwrap(), Some(1));

        let popped = inbox.pop(None, 10, 1).await.unwrap().remove(0);
        assert_eq!(popped.attempt_count, 1);
        let dead = inbox.dead_letter(&popped, "exhausted", 11).await.unwrap();
        assert!(dead);
        let letters = inbox.dead_letters().await.unwrap();
        assert_eq!(inbox.decode_dead_letter(&letters[0]).unwrap(), popped.item);
    }
}
