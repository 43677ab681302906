//! # peerdrive core
//!
//! Core primitives shared by every peerdrive crate.
//!
//! ## Overview
//!
//! - **Identifiers**: [`DriveId`], [`FileId`], [`GlobalTransitId`], [`IdentityId`]
//!   and friends are strong newtypes.
//! - **Scoped secrets**: [`SymmetricKey`] and [`SensitiveBytes`] wipe themselves
//!   on drop.
//! - **Key wrapping**: [`EncryptedKey`] wraps one key under another.
//! - **Key splitting**: [`XorSplitKey`] splits a key between server and client.
//! - **Error taxonomy**: [`ErrorKind`] and [`ClientErrorCode`].
//!
//! ## Key Concepts
//!
//! The key hierarchy is a chain of wraps: a drive's storage key is wrapped by
//! the tenant master key, re-wrapped under a grant's key-store key when the
//! grant includes Read, and the key-store key is in turn recoverable only by
//! combining a server-held half with a client-held half.
//!
//! ## Usage
//!
//! ```rust
//! use peerdrive_core::{EncryptedKey, SymmetricKey, XorSplitKey};
//!
//! let master_key = SymmetricKey::generate();
//! let storage_key = SymmetricKey::generate();
//! let wrapped = EncryptedKey::wrap(&master_key, &storage_key).unwrap();
//! assert_eq!(wrapped.unwrap(&master_key).unwrap(), storage_key);
//!
//! let (server_half, secret, client_half) = XorSplitKey::create();
//! assert_eq!(server_half.combine(&client_half).unwrap(), secret);
//! ```

pub mod crypto;
pub mod error;
pub mod secret;
pub mod types;

pub use crypto::{EncryptedKey, XorSplitKey, NONCE_LEN};
pub use error::{ClientErrorCode, CoreError, ErrorKind, Result};
pub use secret::{SensitiveBytes, SymmetricKey, KEY_LEN};
pub use types::{
    now_millis, DriveAlias, DriveId, DriveType, FileId, FileSystemType, GlobalTransitId,
    IdentityId, InternalDriveFileId, ItemId, RegistrationId, SessionId, TargetDrive,
    TransferInstructionType,
};
