//! Incoming transfer routing.
//!
//! Given a transfer staged in temp storage, the router decides whether it can
//! be written to its drive right now or has to wait in the inbox, performs the
//! write, and raises the follow-up events and push notifications.
//!
//! The same write path serves the perimeter (direct write) and the inbox
//! processor (deferred write), so a file lands identically either way.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use peerdrive_core::{
    now_millis, ClientErrorCode, DriveId, DriveType, EncryptedKey, FileSystemType,
    GlobalTransitId, IdentityId, InternalDriveFileId, ItemId, SymmetricKey, TargetDrive,
    TransferInstructionType,
};
use peerdrive_perms::{DriveManager, RequestContext};
use peerdrive_store::{Inbox, Outbox, OutboxItem, OutboxItemKind, QueueStore, TransferInboxItem};

use crate::error::{Result, TransitError};
use crate::events::{EventBus, TransitEvent};
use crate::filesystem::FileSystemRules;
use crate::messages::{
    decode, encode, FileMetadata, KeyHeader, PushNotification, TransferInstructionSet,
    KEY_HEADER_EXTENSION,
};
use crate::storage::{CommitOutcome, DriveStorage, NewFile};

/// Transit settings for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitConfig {
    /// Idle perimeter sessions are swept after this long.
    pub session_ttl_ms: i64,
    /// The system feed drive; files written here raise a feed event instead
    /// of push notifications.
    pub feed_drive: Option<TargetDrive>,
    /// Drives of this type are treated like the feed.
    pub channel_drive_type: Option<DriveType>,
    /// Largest single part the perimeter buffers from a peer.
    pub max_part_bytes: u64,
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            session_ttl_ms: 15 * 60 * 1000,
            feed_drive: None,
            channel_drive_type: None,
            max_part_bytes: 64 * 1024 * 1024,
        }
    }
}

/// A transfer whose parts are all in temp storage.
#[derive(Debug)]
pub struct StagedTransfer<'a> {
    pub sender: &'a IdentityId,
    pub drive_id: DriveId,
    pub temp_file: InternalDriveFileId,
    pub instruction_set: &'a TransferInstructionSet,
    pub metadata: &'a FileMetadata,
}

pub struct TransferRouter<D, Q> {
    tenant: IdentityId,
    config: TransitConfig,
    drives: Arc<D>,
    storage: Arc<dyn DriveStorage>,
    events: Arc<dyn EventBus>,
    inbox: Inbox<Q>,
    outbox: Outbox<Q>,
}

impl<D: DriveManager, Q: QueueStore> TransferRouter<D, Q> {
    pub fn new(
        tenant: IdentityId,
        config: TransitConfig,
        drives: Arc<D>,
        storage: Arc<dyn DriveStorage>,
        events: Arc<dyn EventBus>,
        queues: Arc<Q>,
    ) -> Self {
        Self {
            tenant,
            config,
            drives,
            storage,
            events,
            inbox: Inbox::new(Arc::clone(&queues)),
            outbox: Outbox::new(queues),
        }
    }

    pub fn tenant(&self) -> &IdentityId {
        &self.tenant
    }

    pub fn config(&self) -> &TransitConfig {
        &self.config
    }

    pub fn drives(&self) -> &Arc<D> {
        &self.drives
    }

    pub fn storage(&self) -> &Arc<dyn DriveStorage> {
        &self.storage
    }

    pub fn events(&self) -> &Arc<dyn EventBus> {
        &self.events
    }

    pub fn inbox(&self) -> &Inbox<Q> {
        &self.inbox
    }

    pub fn outbox(&self) -> &Outbox<Q> {
        &self.outbox
    }

    pub fn is_feed_drive(&self, target: &TargetDrive) -> bool {
        self.config.feed_drive.as_ref() == Some(target)
            || self.config.channel_drive_type == Some(target.drive_type)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Checks
    // ─────────────────────────────────────────────────────────────────────────

    /// Metadata checks that do not depend on which parts were uploaded.
    pub fn validate_metadata(&self, instruction_set: &TransferInstructionSet, metadata: &FileMetadata) -> Result<()> {
        if metadata.global_transit_id.is_none() {
            return Err(TransitError::client(
                ClientErrorCode::InvalidGlobalTransitId,
                "transferred files need a global transit id",
            ));
        }
        if instruction_set.file_system_type.requires_referenced_file() && metadata.referenced_file.is_none() {
            return Err(TransitError::client(
                ClientErrorCode::InvalidMetadata,
                "comments must reference a file",
            ));
        }
        Ok(())
    }

    /// Peers may only ask for push notifications on drives that allow
    /// subscriptions. Checked before anything is written.
    pub async fn assert_notification_allowed(
        &self,
        drive_id: &DriveId,
        instruction_set: &TransferInstructionSet,
    ) -> Result<()> {
        let Some(options) = &instruction_set.app_notification else {
            return Ok(());
        };
        if options.recipients.is_empty() || self.is_feed_drive(&instruction_set.target_drive) {
            return Ok(());
        }

        let drive = self
            .drives
            .get_drive(drive_id)
            .await?
            .ok_or_else(|| TransitError::system(format!("drive {} vanished", drive_id)))?;
        if !drive.allow_subscriptions {
            return Err(TransitError::security(format!(
                "drive {} does not allow subscriptions",
                drive.target_drive
            )));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Direct write
    // ─────────────────────────────────────────────────────────────────────────

    /// Write the transfer now if the caller's context allows it.
    ///
    /// Returns `Ok(None)` when the transfer should go to the inbox instead.
    /// An encrypted comment that cannot be written is a security error.
    pub async fn try_direct_write(
        &self,
        ctx: &RequestContext,
        staged: &StagedTransfer<'_>,
    ) -> Result<Option<InternalDriveFileId>> {
        if !ctx.is_peer_transit() {
            tracing::debug!(auth = ?ctx.auth, "direct write needs a peer transit caller");
            return Ok(None);
        }

        if !staged.metadata.is_encrypted {
            return self.write_file(staged, None, None).await.map(Some);
        }

        let Some(storage_key) = ctx.permissions.try_get_drive_storage_key(&staged.drive_id) else {
            if !staged.instruction_set.file_system_type.may_queue_to_inbox() {
                return Err(TransitError::security(
                    "encrypted comment received while the drive is locked",
                ));
            }
            return Ok(None);
        };

        let shared_secret = ctx
            .permissions
            .shared_secret()
            .ok_or_else(|| TransitError::security("caller has no shared secret"))?;
        let sealed = self
            .read_key_header(&staged.temp_file)
            .await?
            .ok_or_else(|| TransitError::system("key header missing from staged transfer"))?;
        let header = KeyHeader::open(&sealed, shared_secret)?;

        self.write_file(staged, Some(header), Some(&storage_key))
            .await
            .map(Some)
    }

    pub async fn read_key_header(&self, temp_file: &InternalDriveFileId) -> Result<Option<EncryptedKey>> {
        match self.storage.read_temp(temp_file, KEY_HEADER_EXTENSION).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Commit a staged transfer to long-term storage and raise `FileWritten`.
    ///
    /// Encrypted files need the opened key header and the drive's storage
    /// key; the header is stored re-sealed under the storage key.
    ///
    /// Feed events and push notifications are not raised here: they belong
    /// to acceptance (see [`TransferRouter::notify_accepted`]), so a transfer
    /// that waited in the inbox does not notify a second time when its inbox
    /// item is processed.
    pub async fn write_file(
        &self,
        staged: &StagedTransfer<'_>,
        header: Option<KeyHeader>,
        storage_key: Option<&SymmetricKey>,
    ) -> Result<InternalDriveFileId> {
        let key_header = match (staged.metadata.is_encrypted, header, storage_key) {
            (false, _, _) => None,
            (true, Some(header), Some(key)) => Some(header.seal(key)?),
            (true, _, _) => {
                return Err(TransitError::system(
                    "encrypted file written without key header and storage key",
                ))
            }
        };

        let mut payloads = BTreeMap::new();
        for extension in self.storage.temp_extensions(&staged.temp_file).await? {
            if !(extension.starts_with("payload.") || extension.starts_with("thumb.")) {
                continue;
            }
            if let Some(bytes) = self.storage.read_temp(&staged.temp_file, &extension).await? {
                payloads.insert(extension, bytes);
            }
        }

        let outcome = self
            .storage
            .commit_file(NewFile {
                drive_id: staged.drive_id,
                global_transit_id: staged.metadata.global_transit_id,
                sender: Some(staged.sender.clone()),
                file_system_type: staged.instruction_set.file_system_type,
                metadata: staged.metadata.clone(),
                key_header,
                payloads,
            })
            .await?;
        let file = outcome.file();

        tracing::info!(
            drive_id = %staged.drive_id,
            file_id = %file.file_id,
            sender = %staged.sender,
            created = matches!(outcome, CommitOutcome::Created(_)),
            "transfer written"
        );

        self.events
            .publish(TransitEvent::FileWritten {
                file,
                sender: staged.sender.clone(),
                global_transit_id: staged.metadata.global_transit_id,
                created: matches!(outcome, CommitOutcome::Created(_)),
            })
            .await;

        if let Err(e) = self.storage.delete_temp_files(&staged.temp_file).await {
            tracing::warn!(file_id = %staged.temp_file.file_id, error = %e, "temp cleanup failed");
        }

        Ok(file)
    }

    /// Raise the notifications for an accepted transfer, whether it was
    /// written directly or queued to the inbox.
    ///
    /// Feed files raise a feed event; other files get push notifications when
    /// the sender asked for them. `file` is the written file, or the staged
    /// transfer when it went to the inbox.
    pub async fn notify_accepted(&self, staged: &StagedTransfer<'_>, file: InternalDriveFileId) {
        let gtid = staged.metadata.global_transit_id;

        if self.is_feed_drive(&staged.instruction_set.target_drive) {
            // Comments never land in the feed, so a referenced file means the
            // item points at existing content.
            self.events
                .publish(TransitEvent::NewFeedItemReceived {
                    file,
                    sender: staged.sender.clone(),
                    global_transit_id: staged.metadata.referenced_file.or(gtid),
                })
                .await;
            return;
        }

        let Some(options) = &staged.instruction_set.app_notification else {
            return;
        };

        let mut notify_locally = options.recipients.is_empty();
        for recipient in &options.recipients {
            if recipient == &self.tenant {
                notify_locally = true;
                continue;
            }
            let notification = PushNotification {
                global_transit_id: gtid,
                options: options.clone(),
            };
            let queued = match encode(&notification) {
                Ok(state) => {
                    let item = OutboxItem::new(
                        file,
                        recipient.clone(),
                        OutboxItemKind::PushNotification,
                        state,
                        now_millis(),
                    );
                    self.outbox.push(&item, true).await.map_err(TransitError::from)
                }
                Err(e) => Err(e),
            };
            if let Err(e) = queued {
                tracing::warn!(%recipient, error = %e, "failed to queue peer push notification");
            }
        }

        if notify_locally {
            self.events
                .publish(TransitEvent::PushNotificationRequested {
                    sender: staged.sender.clone(),
                    global_transit_id: gtid,
                    options: options.clone(),
                })
                .await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbox
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue a staged transfer for a later inbox pass.
    pub async fn route_to_inbox(&self, staged: &StagedTransfer<'_>) -> Result<ItemId> {
        let fst = staged.instruction_set.file_system_type;
        if !fst.may_queue_to_inbox() {
            return Err(TransitError::security(format!("{:?} files cannot be queued", fst)));
        }

        let mut item = TransferInboxItem::new(
            staged.sender.clone(),
            staged.drive_id,
            TransferInstructionType::SaveFile,
            fst,
            now_millis(),
        )
        .with_temp_file(staged.temp_file.file_id);
        if let Some(gtid) = staged.metadata.global_transit_id {
            item = item.with_global_transit_id(gtid);
        }
        if let Some(sealed) = self.read_key_header(&staged.temp_file).await? {
            item = item.with_key_header(sealed);
        }

        self.enqueue_inbox_item(item).await
    }

    /// Queue a delete or read receipt.
    pub async fn queue_instruction(
        &self,
        sender: &IdentityId,
        drive_id: DriveId,
        instruction_type: TransferInstructionType,
        file_system_type: FileSystemType,
        global_transit_id: GlobalTransitId,
    ) -> Result<ItemId> {
        let item = TransferInboxItem::new(
            sender.clone(),
            drive_id,
            instruction_type,
            file_system_type,
            now_millis(),
        )
        .with_global_transit_id(global_transit_id);
        self.enqueue_inbox_item(item).await
    }

    async fn enqueue_inbox_item(&self, item: TransferInboxItem) -> Result<ItemId> {
        self.inbox.push(&item, false).await?;
        tracing::info!(
            drive_id = %item.drive_id,
            item_id = %item.id,
            sender = %item.sender,
            instruction = ?item.instruction_type,
            "transfer queued to inbox"
        );
        self.events
            .publish(TransitEvent::InboxItemReceived {
                drive_id: item.drive_id,
                item_id: item.id,
                sender: item.sender.clone(),
                instruction_type: item.instruction_type,
            })
            .await;
        Ok(item.id)
    }
}
