//! # peerdrive transit
//!
//! Moving files between identities.
//!
//! ## Overview
//!
//! A sender uploads a file to the recipient's perimeter in parts. On finalize
//! the recipient either writes the file straight to its drive or, when that is
//! not possible right now, queues it to the inbox for a later pass by someone
//! who can unlock the drive. On the sending side every (file, recipient) pair
//! is an outbox item delivered and retried independently.
//!
//! ## Key Types
//!
//! - [`PeerPerimeter`] - the upload state machine (`initialize → accept_part* → finalize`)
//! - [`TransferRouter`] - direct write vs. inbox, plus the follow-up events
//! - [`InboxProcessor`] / [`OutboxProcessor`] - queue workers
//! - [`DriveStorage`], [`EventBus`], [`PeerTransport`], [`PeerEndpoint`] - collaborators
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use peerdrive_core::{FileSystemType, GlobalTransitId, IdentityId};
//! use peerdrive_perms::{MemoryDriveManager, RequestContext};
//! use peerdrive_store::MemoryQueueStore;
//! use peerdrive_transit::{
//!     FileMetadata, MemoryDriveStorage, MemoryEventBus, PartKind, PeerPerimeter,
//!     TransferInstructionSet, TransferRouter, TransitConfig,
//! };
//!
//! async fn example(ctx: RequestContext, set: TransferInstructionSet) {
//!     let router = Arc::new(TransferRouter::new(
//!         IdentityId::new("frodo.example").unwrap(),
//!         TransitConfig::default(),
//!         Arc::new(MemoryDriveManager::new()),
//!         Arc::new(MemoryDriveStorage::new()),
//!         Arc::new(MemoryEventBus::new()),
//!         Arc::new(MemoryQueueStore::new()),
//!     ));
//!     let perimeter = PeerPerimeter::new(router);
//!
//!     let session = perimeter.initialize(&ctx, set).await.unwrap();
//!     perimeter
//!         .accept_part(&ctx, &session, PartKind::payload("main"), &b"hello"[..])
//!         .await
//!         .unwrap();
//!     let metadata = FileMetadata {
//!         global_transit_id: Some(GlobalTransitId::random()),
//!         ..Default::default()
//!     };
//!     let code = perimeter.finalize(&ctx, &session, metadata).await.unwrap();
//!     println!("{:?}", code);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Sessions are volatile**: a restart loses in-flight uploads; senders
//!   start again. Idle sessions are swept after a TTL
//! - **Inbox is not an error path**: being unable to write now is a normal
//!   outcome, except for encrypted comments, which are refused outright
//! - **Independent fan-out**: each recipient's delivery succeeds, retries or
//!   gives up on its own
//! - **Key headers**: they travel sealed under the connection's shared secret
//!   and are stored sealed under the drive's storage key

pub mod error;
pub mod events;
pub mod filesystem;
pub mod inbox;
pub mod messages;
pub mod outbox;
pub mod perimeter;
pub mod router;
pub mod session;
pub mod storage;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, TransitError};
pub use events::{EventBus, MemoryEventBus, TransitEvent};
pub use filesystem::FileSystemRules;
pub use inbox::{ConnectionSecrets, InboxOutcome, InboxProcessor};
pub use messages::{
    AppNotificationOptions, EnvelopePart, FileMetadata, KeyHeader, PartKind, PayloadDescriptor,
    PushNotification, SendContents, TransferEnvelope, TransferInstructionSet, TransferStatus,
    TransitResponseCode,
};
pub use outbox::{DeliveryReport, OutboxProcessor, RecipientTokens};
pub use perimeter::PeerPerimeter;
pub use router::{StagedTransfer, TransferRouter, TransitConfig};
pub use session::{IncomingTransferState, SessionMap, TransferPhase};
pub use storage::{CommitOutcome, DriveStorage, MemoryDriveStorage, NewFile, StoredFile};
pub use transport::{memory::MemoryPeerNetwork, PeerEndpoint, PeerTransport};
