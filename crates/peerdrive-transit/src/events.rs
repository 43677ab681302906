//! Domain events raised by transit, consumed by notification fan-out and
//! drive indexing.

use async_trait::async_trait;
use tokio::sync::Mutex;

use peerdrive_core::{
    DriveId, GlobalTransitId, IdentityId, InternalDriveFileId, ItemId, TransferInstructionType,
};

use crate::messages::AppNotificationOptions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitEvent {
    /// A transferred file was written to a drive.
    FileWritten {
        file: InternalDriveFileId,
        sender: IdentityId,
        global_transit_id: Option<GlobalTransitId>,
        created: bool,
    },
    /// A transfer was queued and needs an inbox pass.
    InboxItemReceived {
        drive_id: DriveId,
        item_id: ItemId,
        sender: IdentityId,
        instruction_type: TransferInstructionType,
    },
    /// A file landed in the feed; no push notification follows.
    NewFeedItemReceived {
        file: InternalDriveFileId,
        sender: IdentityId,
        global_transit_id: Option<GlobalTransitId>,
    },
    /// Notify the local identity's devices.
    PushNotificationRequested {
        sender: IdentityId,
        global_transit_id: Option<GlobalTransitId>,
        options: AppNotificationOptions,
    },
    LinkedFileDeleted {
        file: InternalDriveFileId,
        sender: IdentityId,
        global_transit_id: GlobalTransitId,
    },
    FileMarkedRead {
        file: InternalDriveFileId,
        reader: IdentityId,
        global_transit_id: GlobalTransitId,
    },
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event. Delivery is best effort.
    async fn publish(&self, event: TransitEvent);
}

/// Records every event; used in tests and as a default sink.
#[derive(Default)]
pub struct MemoryEventBus {
    events: Mutex<Vec<TransitEvent>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<TransitEvent> {
        self.events.lock().await.clone()
    }

    /// Drain the recorded events.
    pub async fn take(&self) -> Vec<TransitEvent> {
        std::mem::take(&mut *self.events.lock().await)
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: TransitEvent) {
        tracing::trace!(?event, "transit event");
        self.events.lock().await.push(event);
    }
}
