//! # peerdrive
//!
//! One tenant of a federated identity network: encrypted drives, connections
//! to other identities, and store-and-forward file transit between them.
//!
//! ## Overview
//!
//! Every identity runs its own [`Tenant`]. A tenant:
//!
//! - **Owns drives**: each with a storage key wrapped under the owner's master key
//! - **Issues connections**: an exchange grant plus a transit token per peer
//! - **Receives transfers**: through its perimeter, as a [`PeerEndpoint`]
//! - **Sends files**: one outbox item per recipient, retried independently
//!
//! ## Key Concepts
//!
//! - **Direct write**: a transfer is written straight to the drive when the
//!   sender's grant can unlock it
//! - **Inbox**: otherwise it waits until the owner processes the drive's inbox
//! - **Shared secret**: per connection; seals key headers in transit
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use peerdrive::{Tenant, TenantConfig};
//! use peerdrive::core::{IdentityId, SymmetricKey};
//! use peerdrive::perms::{CreateDriveRequest, DriveGrantRequest, DrivePermission, MemoryDriveManager, PermissionSet};
//! use peerdrive::store::MemoryQueueStore;
//! use peerdrive::transit::{MemoryDriveStorage, MemoryEventBus, MemoryPeerNetwork};
//!
//! async fn example() {
//!     let frodo = Arc::new(Tenant::new(
//!         IdentityId::new("frodo.example").unwrap(),
//!         SymmetricKey::generate(),
//!         TenantConfig::default(),
//!         Arc::new(MemoryDriveManager::new()),
//!         Arc::new(MemoryDriveStorage::new()),
//!         Arc::new(MemoryEventBus::new()),
//!         Arc::new(MemoryQueueStore::new()),
//!     ));
//!     let chat = frodo.create_drive(CreateDriveRequest::new("chat")).await.unwrap();
//!
//!     // Let sam write to the chat drive; hand the token to sam.
//!     let sam = IdentityId::new("sam.example").unwrap();
//!     let _token = frodo
//!         .connect(
//!             sam,
//!             &[DriveGrantRequest::new(chat.target_drive, DrivePermission::WRITE)],
//!             PermissionSet::new(),
//!         )
//!         .await
//!         .unwrap();
//!
//!     let network = MemoryPeerNetwork::new();
//!     network.register(frodo.identity().clone(), frodo.clone()).await;
//!
//!     // Later, apply whatever sam's transfers left in the inbox.
//!     frodo.process_inbox(&chat.target_drive, None).await.unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `peerdrive::core` - identifiers, keys, error taxonomy
//! - `peerdrive::perms` - grants, registrations, permission contexts
//! - `peerdrive::store` - inbox/outbox queues
//! - `peerdrive::transit` - perimeter, router, queue workers

pub mod config;
pub mod connections;
pub mod error;
pub mod tenant;

// Re-export component crates
pub use peerdrive_core as core;
pub use peerdrive_perms as perms;
pub use peerdrive_store as store;
pub use peerdrive_transit as transit;

// Re-export main types for convenience
pub use config::TenantConfig;
pub use connections::ConnectionRegistry;
pub use error::{Result, TenantError};
pub use tenant::{OutgoingFile, SendReport, Tenant};

pub use peerdrive_transit::{
    DeliveryReport, PeerEndpoint, PeerTransport, TransferStatus, TransitResponseCode,
};
