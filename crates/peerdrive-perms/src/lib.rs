//! # peerdrive perms
//!
//! The capability model: who may do what on which drive, and with which keys.
//!
//! ## Overview
//!
//! - [`ExchangeGrant`]: drive grants plus permission keys, issued to an app,
//!   circle, or connected identity.
//! - [`DriveGrant`]: one drive's permission, optionally carrying the drive's
//!   storage key re-wrapped under the grant's key-store key.
//! - [`AccessRegistration`] / [`ClientAccessToken`]: a server half and a client
//!   half of a split key that unlocks the grant.
//! - [`PermissionContext`]: the per-request union of [`PermissionGroup`]s.
//! - [`ExchangeGrantService`]: creates all of the above.
//!
//! ## Key Concepts
//!
//! - **Read carries keys**: a drive grant holds a wrapped storage key iff its
//!   permission includes Read.
//! - **Union, not intersection**: a right is held if any group grants it.
//! - **Fail closed**: a group without its key-store key yields no storage keys.
//! - **Revocation in place**: revoked grants and registrations are kept but
//!   never produce a usable group.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use peerdrive_core::SymmetricKey;
//! use peerdrive_perms::{
//!     ClientTokenType, CreateDriveRequest, DriveGrantRequest, DrivePermission,
//!     ExchangeGrantService, MemoryDriveManager, PermissionContextOptions, PermissionSet,
//! };
//!
//! async fn example() {
//!     let drives = Arc::new(MemoryDriveManager::new());
//!     let master_key = SymmetricKey::generate();
//!     let drive = drives
//!         .create_drive(&master_key, CreateDriveRequest::new("photos"))
//!         .await
//!         .unwrap();
//!
//!     let service = ExchangeGrantService::new(drives);
//!     let key_store_key = SymmetricKey::generate();
//!     let grant = service
//!         .create_exchange_grant(
//!             &key_store_key,
//!             PermissionSet::new(),
//!             &[DriveGrantRequest::new(drive.target_drive, DrivePermission::READ)],
//!             Some(&master_key),
//!             None,
//!         )
//!         .await
//!         .unwrap();
//!
//!     let (registration, token) = service
//!         .create_client_access_token(Some(&key_store_key), ClientTokenType::App, None)
//!         .unwrap();
//!
//!     let grants = BTreeMap::from([("photos-app".to_string(), grant)]);
//!     let ctx = service
//!         .create_permission_context(
//!             &token.to_authentication_token(),
//!             &grants,
//!             &registration,
//!             &PermissionContextOptions::default(),
//!         )
//!         .await
//!         .unwrap();
//!     ctx.assert_can_read_drive(&drive.id).unwrap();
//! }
//! ```

pub mod context;
pub mod drive;
pub mod error;
pub mod grant;
pub mod group;
pub mod permission;
pub mod registration;
pub mod service;

pub use context::{AuthContext, NamedGroup, PermissionContext, RequestContext};
pub use drive::{CreateDriveRequest, DriveManager, MemoryDriveManager, StorageDrive};
pub use error::{PermsError, Result};
pub use grant::{
    DriveGrant, DriveGrantRequest, ExchangeGrant, PermissionedDrive, RedactedDriveGrant,
    RedactedExchangeGrant,
};
pub use group::PermissionGroup;
pub use permission::{DrivePermission, PermissionKey, PermissionSet};
pub use registration::{
    AccessRegistration, ClientAccessToken, ClientAuthenticationToken, ClientTokenType,
    RedactedAccessRegistration,
};
pub use service::{
    ExchangeGrantService, PermissionContextOptions, ADDITIONAL_PERMISSIONS_GROUP,
    ANONYMOUS_DRIVES_GROUP, OWNER_GROUP,
};
