//! Exchange grants and drive grants.
//!
//! An [`ExchangeGrant`] is what an app, circle, or connected identity is
//! issued: a set of drive grants plus tenant-wide permission keys. Grants are
//! revoked in place and kept for audit.

use serde::{Deserialize, Serialize};

use peerdrive_core::{now_millis, DriveId, EncryptedKey, TargetDrive};

use crate::permission::{DrivePermission, PermissionSet};

/// A drive together with the rights being granted on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionedDrive {
    pub drive: TargetDrive,
    pub permission: DrivePermission,
}

/// A request for access to one drive, expressed by public alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveGrantRequest {
    pub permissioned_drive: PermissionedDrive,
}

impl DriveGrantRequest {
    pub fn new(drive: TargetDrive, permission: DrivePermission) -> Self {
        Self {
            permissioned_drive: PermissionedDrive { drive, permission },
        }
    }
}

/// One drive's entry within an exchange grant.
///
/// Invariant: `key_store_key_encrypted_storage_key` is present iff
/// the permission includes Read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveGrant {
    pub drive_id: DriveId,
    pub permissioned_drive: PermissionedDrive,
    pub key_store_key_encrypted_storage_key: Option<EncryptedKey>,
}

impl DriveGrant {
    pub fn permission(&self) -> DrivePermission {
        self.permissioned_drive.permission
    }

    pub fn redacted(&self) -> RedactedDriveGrant {
        RedactedDriveGrant {
            drive_id: self.drive_id,
            permissioned_drive: self.permissioned_drive,
            has_storage_key: self.key_store_key_encrypted_storage_key.is_some(),
        }
    }
}

/// A persisted bundle of drive access and permission keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeGrant {
    pub created: i64,
    pub modified: i64,
    /// Absent when the grant was created without the owner's master key.
    pub master_key_encrypted_key_store_key: Option<EncryptedKey>,
    pub is_revoked: bool,
    pub drive_grants: Vec<DriveGrant>,
    pub permission_set: PermissionSet,
    /// Inter-circle relationship key, wrapped under the key-store key.
    pub key_store_key_encrypted_icr_key: Option<EncryptedKey>,
}

impl ExchangeGrant {
    /// Revoke in place. The grant is kept for audit.
    pub fn revoke(&mut self) {
        self.is_revoked = true;
        self.modified = now_millis();
    }

    /// Projection without any key material, for display and logging.
    pub fn redacted(&self) -> RedactedExchangeGrant {
        RedactedExchangeGrant {
            created: self.created,
            modified: self.modified,
            is_revoked: self.is_revoked,
            drive_grants: self.drive_grants.iter().map(DriveGrant::redacted).collect(),
            permission_set: self.permission_set.clone(),
        }
    }

    pub fn drive_grant(&self, drive_id: &DriveId) -> Option<&DriveGrant> {
        self.drive_grants.iter().find(|g| &g.drive_id == drive_id)
    }
}

/// Key-free view of a [`DriveGrant`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedDriveGrant {
    pub drive_id: DriveId,
    pub permissioned_drive: PermissionedDrive,
    pub has_storage_key: bool,
}

/// Key-free view of an [`ExchangeGrant`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedExchangeGrant {
    pub created: i64,
    pub modified: i64,
    pub is_revoked: bool,
    pub drive_grants: Vec<RedactedDriveGrant>,
    pub permission_set: PermissionSet,
}
