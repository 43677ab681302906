//! Typed queue items.
//!
//! These are what the transit layer actually puts on the queues. Each item
//! knows which queue it belongs to, how it is partitioned and, for outbox
//! items, the key that makes a (file, recipient) pair unique.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use peerdrive_core::{
    DriveId, EncryptedKey, FileId, FileSystemType, GlobalTransitId, IdentityId,
    InternalDriveFileId, ItemId, TransferInstructionType,
};

use crate::traits::QueueKind;

/// Something that can be stored on a queue.
pub trait QueueItem: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: QueueKind;

    fn id(&self) -> ItemId;

    fn added(&self) -> i64;

    fn partition(&self) -> String;

    fn priority(&self) -> i64 {
        0
    }

    fn dedupe_key(&self) -> Option<String> {
        None
    }
}

/// A received transfer that could not be applied straight away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInboxItem {
    pub id: ItemId,
    pub added: i64,
    pub sender: IdentityId,
    pub drive_id: DriveId,
    /// Upload staging file holding metadata and payloads (SaveFile only).
    pub temp_file: Option<FileId>,
    /// Target of a DeleteLinkedFile or ReadReceipt.
    pub global_transit_id: Option<GlobalTransitId>,
    pub instruction_type: TransferInstructionType,
    pub file_system_type: FileSystemType,
    /// The file's key header, sealed under the sender's shared secret.
    pub shared_secret_encrypted_key_header: Option<EncryptedKey>,
}

impl TransferInboxItem {
    pub fn new(
        sender: IdentityId,
        drive_id: DriveId,
        instruction_type: TransferInstructionType,
        file_system_type: FileSystemType,
        added: i64,
    ) -> Self {
        Self {
            id: ItemId::random(),
            added,
            sender,
            drive_id,
            temp_file: None,
            global_transit_id: None,
            instruction_type,
            file_system_type,
            shared_secret_encrypted_key_header: None,
        }
    }

    pub fn with_temp_file(mut self, file: FileId) -> Self {
        self.temp_file = Some(file);
        self
    }

    pub fn with_global_transit_id(mut self, gtid: GlobalTransitId) -> Self {
        self.global_transit_id = Some(gtid);
        self
    }

    pub fn with_key_header(mut self, header: EncryptedKey) -> Self {
        self.shared_secret_encrypted_key_header = Some(header);
        self
    }
}

impl QueueItem for TransferInboxItem {
    const KIND: QueueKind = QueueKind::Inbox;

    fn id(&self) -> ItemId {
        self.id
    }

    fn added(&self) -> i64 {
        self.added
    }

    fn partition(&self) -> String {
        self.drive_id.to_hex()
    }
}

/// What an outbox item delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboxItemKind {
    /// A file transfer to a peer's perimeter.
    File,
    /// A push notification relayed through a peer.
    PushNotification,
}

/// One pending delivery of a file to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: ItemId,
    pub added: i64,
    pub file: InternalDriveFileId,
    pub recipient: IdentityId,
    pub priority: i64,
    pub kind: OutboxItemKind,
    /// Opaque delivery state, owned by the transit layer.
    pub state: Vec<u8>,
}

impl OutboxItem {
    /// Push notifications jump the queue.
    pub const PRIORITY_HIGH: i64 = 0;
    pub const PRIORITY_DEFAULT: i64 = 100;

    pub fn new(
        file: InternalDriveFileId,
        recipient: IdentityId,
        kind: OutboxItemKind,
        state: Vec<u8>,
        added: i64,
    ) -> Self {
        let priority = match kind {
            OutboxItemKind::PushNotification => Self::PRIORITY_HIGH,
            OutboxItemKind::File => Self::PRIORITY_DEFAULT,
        };
        Self {
            id: ItemId::random(),
            added,
            file,
            recipient,
            priority,
            kind,
            state,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

impl QueueItem for OutboxItem {
    const KIND: QueueKind = QueueKind::Outbox;

    fn id(&self) -> ItemId {
        self.id
    }

    fn added(&self) -> i64 {
        self.added
    }

    fn partition(&self) -> String {
        self.recipient.to_string()
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    fn dedupe_key(&self) -> Option<String> {
        let kind = match self.kind {
            OutboxItemKind::File => "file",
            OutboxItemKind::PushNotification => "push",
        };
        Some(format!(
            "{}:{}:{}:{}",
            kind,
            self.file.drive_id.to_hex(),
            self.file.file_id.to_hex(),
            self.recipient
        ))
    }
}
