//! Deferred processing of queued transfers.
//!
//! Items land in the inbox when the perimeter could not apply them on arrival,
//! usually because the drive was locked. A pass runs with a context that can
//! unlock the drive (the owner, or an app holding the storage key) and applies
//! each item through the same write path the perimeter uses.
//!
//! Every item ends in one of three ways. Completed items are removed. Items
//! that may succeed later are rescheduled with backoff until the retry policy
//! gives up. Items that can never succeed are dead-lettered at once.

use std::sync::Arc;

use async_trait::async_trait;

use peerdrive_core::{
    now_millis, ErrorKind, IdentityId, InternalDriveFileId, SymmetricKey, TargetDrive,
    TransferInstructionType,
};
use peerdrive_perms::{DriveManager, RequestContext};
use peerdrive_store::{Popped, QueueStatus, QueueStore, RetryPolicy, TransferInboxItem};

use crate::error::{Result, TransitError};
use crate::events::TransitEvent;
use crate::filesystem::FileSystemRules;
use crate::messages::{
    decode, FileMetadata, KeyHeader, TransferInstructionSet, INSTRUCTION_SET_EXTENSION,
    METADATA_EXTENSION,
};
use crate::router::{StagedTransfer, TransferRouter};

/// Resolves the shared secret of an established connection.
#[async_trait]
pub trait ConnectionSecrets: Send + Sync {
    async fn shared_secret_for(&self, sender: &IdentityId) -> Option<SymmetricKey>;
}

/// What became of one inbox item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxOutcome {
    Completed,
    /// Try again later with backoff.
    RetryLater(String),
    /// Never going to succeed; dead-letter it.
    Discard(String),
}

impl InboxOutcome {
    fn from_error(e: &TransitError) -> Self {
        match e.kind() {
            ErrorKind::Security | ErrorKind::Client => InboxOutcome::Discard(e.to_string()),
            ErrorKind::System => InboxOutcome::RetryLater(e.to_string()),
        }
    }
}

pub struct InboxProcessor<D, Q> {
    router: Arc<TransferRouter<D, Q>>,
    retry: RetryPolicy,
}

impl<D: DriveManager, Q: QueueStore> InboxProcessor<D, Q> {
    pub fn new(router: Arc<TransferRouter<D, Q>>, retry: RetryPolicy) -> Self {
        Self { router, retry }
    }

    /// Work through up to `batch_size` due items for one drive.
    ///
    /// Items are popped one at a time so a slow item does not hold the rest
    /// of the batch reserved. Returns the drive's queue status afterwards.
    pub async fn process_inbox(
        &self,
        ctx: &RequestContext,
        target: &TargetDrive,
        batch_size: usize,
        secrets: &dyn ConnectionSecrets,
    ) -> Result<QueueStatus> {
        let drive_id = ctx.permissions.get_drive_id(target)?;
        let partition = drive_id.to_hex();
        let inbox = self.router.inbox();

        for _ in 0..batch_size.max(1) {
            let Some(popped) = inbox.pop(Some(&partition), now_millis(), 1).await?.pop() else {
                break;
            };
            let outcome = self.process_item(ctx, &popped.item, secrets).await;
            self.settle(&popped, outcome).await?;
        }

        Ok(inbox.status(Some(&partition)).await?)
    }

    /// Apply one item without touching the queue.
    pub async fn process_item(
        &self,
        ctx: &RequestContext,
        item: &TransferInboxItem,
        secrets: &dyn ConnectionSecrets,
    ) -> InboxOutcome {
        if let Err(e) = item
            .file_system_type
            .assert_can_write(&ctx.permissions, &item.drive_id)
        {
            return InboxOutcome::from_error(&e);
        }

        let result = match item.instruction_type {
            TransferInstructionType::SaveFile => self.save_file(ctx, item, secrets).await,
            TransferInstructionType::DeleteLinkedFile => self.delete_linked_file(item).await,
            TransferInstructionType::ReadReceipt => self.mark_read(item).await,
        };
        result.unwrap_or_else(|e| InboxOutcome::from_error(&e))
    }

    async fn save_file(
        &self,
        ctx: &RequestContext,
        item: &TransferInboxItem,
        secrets: &dyn ConnectionSecrets,
    ) -> Result<InboxOutcome> {
        let Some(file_id) = item.temp_file else {
            return Ok(InboxOutcome::Discard("save file item without a staged transfer".into()));
        };
        let temp_file = InternalDriveFileId {
            drive_id: item.drive_id,
            file_id,
        };
        let storage = self.router.storage();

        let Some(raw_set) = storage.read_temp(&temp_file, INSTRUCTION_SET_EXTENSION).await? else {
            return self.already_applied(item).await;
        };
        let Some(raw_metadata) = storage.read_temp(&temp_file, METADATA_EXTENSION).await? else {
            return Ok(InboxOutcome::Discard("staged transfer has no metadata".into()));
        };
        let instruction_set: TransferInstructionSet = decode(&raw_set)?;
        let metadata: FileMetadata = decode(&raw_metadata)?;

        let mut header = None;
        let mut storage_key = None;
        if metadata.is_encrypted {
            let Some(key) = ctx.permissions.try_get_drive_storage_key(&item.drive_id) else {
                return Ok(InboxOutcome::RetryLater("drive is locked".into()));
            };
            let Some(sealed) = &item.shared_secret_encrypted_key_header else {
                return Ok(InboxOutcome::Discard("encrypted transfer without a key header".into()));
            };
            let Some(secret) = secrets.shared_secret_for(&item.sender).await else {
                return Ok(InboxOutcome::RetryLater(format!(
                    "no shared secret for {}",
                    item.sender
                )));
            };
            header = Some(KeyHeader::open(sealed, &secret)?);
            storage_key = Some(key);
        }

        let staged = StagedTransfer {
            sender: &item.sender,
            drive_id: item.drive_id,
            temp_file,
            instruction_set: &instruction_set,
            metadata: &metadata,
        };
        self.router
            .write_file(&staged, header, storage_key.as_ref())
            .await?;
        Ok(InboxOutcome::Completed)
    }

    /// The staging files are gone. That is expected when the item was already
    /// written and the worker died before completing it.
    async fn already_applied(&self, item: &TransferInboxItem) -> Result<InboxOutcome> {
        if let Some(gtid) = &item.global_transit_id {
            let existing = self
                .router
                .storage()
                .get_file_by_global_transit_id(&item.drive_id, gtid)
                .await?;
            if existing.is_some_and(|f| f.sender.as_ref() == Some(&item.sender)) {
                tracing::debug!(item_id = %item.id, %gtid, "inbox item already applied");
                return Ok(InboxOutcome::Completed);
            }
        }
        Ok(InboxOutcome::Discard("staged transfer is gone".into()))
    }

    async fn delete_linked_file(&self, item: &TransferInboxItem) -> Result<InboxOutcome> {
        let Some(gtid) = item.global_transit_id else {
            return Ok(InboxOutcome::Discard("delete without a global transit id".into()));
        };
        let storage = self.router.storage();
        let file = match storage.get_file_by_global_transit_id(&item.drive_id, &gtid).await? {
            Some(file) if !file.is_deleted => file,
            _ => {
                tracing::debug!(item_id = %item.id, %gtid, "linked file already gone");
                return Ok(InboxOutcome::Completed);
            }
        };
        if file.sender.as_ref() != Some(&item.sender) {
            return Ok(InboxOutcome::Discard(format!(
                "{} did not send {}",
                item.sender, gtid
            )));
        }

        storage.soft_delete(&file.file).await?;
        tracing::info!(drive_id = %item.drive_id, file_id = %file.file.file_id, sender = %item.sender, "linked file deleted");
        self.router
            .events()
            .publish(TransitEvent::LinkedFileDeleted {
                file: file.file,
                sender: item.sender.clone(),
                global_transit_id: gtid,
            })
            .await;
        Ok(InboxOutcome::Completed)
    }

    async fn mark_read(&self, item: &TransferInboxItem) -> Result<InboxOutcome> {
        let Some(gtid) = item.global_transit_id else {
            return Ok(InboxOutcome::Discard("read receipt without a global transit id".into()));
        };
        let storage = self.router.storage();
        let Some(file) = storage.get_file_by_global_transit_id(&item.drive_id, &gtid).await? else {
            tracing::debug!(item_id = %item.id, %gtid, "read receipt for unknown file");
            return Ok(InboxOutcome::Completed);
        };

        if storage.mark_read(&file.file, &item.sender).await? {
            self.router
                .events()
                .publish(TransitEvent::FileMarkedRead {
                    file: file.file,
                    reader: item.sender.clone(),
                    global_transit_id: gtid,
                })
                .await;
        }
        Ok(InboxOutcome::Completed)
    }

    async fn settle(&self, popped: &Popped<TransferInboxItem>, outcome: InboxOutcome) -> Result<()> {
        let inbox = self.router.inbox();
        let item = &popped.item;
        let now = now_millis();

        match outcome {
            InboxOutcome::Completed => {
                inbox.complete(popped).await?;
            }
            InboxOutcome::RetryLater(reason) => {
                let attempts = popped.attempt_count + 1;
                if self.retry.is_exhausted(attempts) {
                    tracing::warn!(item_id = %item.id, attempts, %reason, "inbox item out of retries");
                    inbox
                        .dead_letter(popped, &format!("retry limit reached: {}", reason), now)
                        .await?;
                    self.discard_staging(item).await;
                } else {
                    tracing::debug!(item_id = %item.id, attempts, %reason, "inbox item deferred");
                    inbox.fail(popped, self.retry.next_run_at(attempts, now)).await?;
                }
            }
            InboxOutcome::Discard(reason) => {
                tracing::warn!(item_id = %item.id, sender = %item.sender, %reason, "inbox item discarded");
                inbox.dead_letter(popped, &reason, now).await?;
                self.discard_staging(item).await;
            }
        }
        Ok(())
    }

    async fn discard_staging(&self, item: &TransferInboxItem) {
        let Some(file_id) = item.temp_file else {
            return;
        };
        let temp_file = InternalDriveFileId {
            drive_id: item.drive_id,
            file_id,
        };
        if let Err(e) = self.router.storage().delete_temp_files(&temp_file).await {
            tracing::warn!(item_id = %item.id, error = %e, "temp cleanup failed");
        }
    }
}
