//! # peerdrive store
//!
//! Durable work queues for peer transit: the inbox of received transfers that
//! could not be applied on arrival, and the outbox of pending deliveries.
//!
//! ## Overview
//!
//! Both queues share one storage contract, [`QueueStore`], and differ only in
//! [`QueueKind`] and in the typed item they carry. [`SqliteQueueStore`] is the
//! durable backend; [`MemoryQueueStore`] has the same semantics for tests.
//!
//! ## Key Types
//!
//! - [`QueueStore`] - reservation-based queue persistence
//! - [`Inbox`] / [`Outbox`] - typed views encoding items with CBOR
//! - [`TransferInboxItem`] / [`OutboxItem`] - the queued work
//! - [`RetryPolicy`] - bounded exponential backoff
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use peerdrive_core::{DriveId, FileSystemType, IdentityId, TransferInstructionType, now_millis};
//! use peerdrive_store::{Inbox, SqliteQueueStore, TransferInboxItem};
//!
//! async fn example() {
//!     let store = Arc::new(SqliteQueueStore::open("queues.db").unwrap());
//!     let inbox = Inbox::new(store);
//!
//!     let drive = DriveId::random();
//!     let item = TransferInboxItem::new(
//!         IdentityId::new("frodo.example").unwrap(),
//!         drive,
//!         TransferInstructionType::SaveFile,
//!         FileSystemType::Standard,
//!         now_millis(),
//!     );
//!     inbox.push(&item, false).await.unwrap();
//!
//!     for popped in inbox.pop(Some(&drive.to_hex()), now_millis(), 10).await.unwrap() {
//!         inbox.complete(&popped).await.unwrap();
//!     }
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Reservations**: a popped entry carries a [`PopStamp`]; only the holder
//!   of the stamp can complete, fail, or dead-letter it
//! - **Bounded retry**: entries past [`RetryPolicy::max_attempts`] go to the
//!   dead-letter table instead of being rescheduled
//! - **Crash recovery**: reservations left behind by a crashed worker are
//!   released with [`QueueStore::recover`]

pub mod error;
pub mod items;
pub mod memory;
pub mod migration;
pub mod queue;
pub mod retry;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use items::{OutboxItem, OutboxItemKind, QueueItem, TransferInboxItem};
pub use memory::MemoryQueueStore;
pub use queue::{Inbox, Outbox, Popped, TypedQueue};
pub use retry::RetryPolicy;
pub use sqlite::SqliteQueueStore;
pub use traits::{DeadLetter, PopStamp, QueueEntry, QueueKind, QueueStatus, QueueStore};
