//! Permission groups: one grant's rights with live key material.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use peerdrive_core::{DriveId, SymmetricKey};

use crate::error::Result;
use crate::grant::DriveGrant;
use crate::permission::{DrivePermission, PermissionKey, PermissionSet};

/// The request-scoped form of a grant.
///
/// Storage keys are decrypted from the key-store key the first time they are
/// needed and cached for the rest of the request. Without a key-store key,
/// every storage key lookup returns `None`.
pub struct PermissionGroup {
    permission_set: PermissionSet,
    drive_grants: Vec<DriveGrant>,
    key_store_key: Option<SymmetricKey>,
    storage_keys: Mutex<HashMap<DriveId, SymmetricKey>>,
}

impl PermissionGroup {
    pub fn new(
        permission_set: PermissionSet,
        drive_grants: Vec<DriveGrant>,
        key_store_key: Option<SymmetricKey>,
    ) -> Self {
        Self {
            permission_set,
            drive_grants,
            key_store_key,
            storage_keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn permission_set(&self) -> &PermissionSet {
        &self.permission_set
    }

    pub fn drive_grants(&self) -> &[DriveGrant] {
        &self.drive_grants
    }

    pub fn has_permission(&self, key: PermissionKey) -> bool {
        self.permission_set.has(key)
    }

    /// Combined permission this group holds on a drive.
    pub fn drive_permission(&self, drive_id: &DriveId) -> DrivePermission {
        self.drive_grants
            .iter()
            .filter(|g| &g.drive_id == drive_id)
            .fold(DrivePermission::NONE, |acc, g| acc | g.permission())
    }

    pub fn has_drive_permission(&self, drive_id: &DriveId, permission: DrivePermission) -> bool {
        !permission.is_empty() && self.drive_permission(drive_id).contains(permission)
    }

    pub fn mentions_drive(&self, drive_id: &DriveId) -> bool {
        self.drive_grants.iter().any(|g| &g.drive_id == drive_id)
    }

    /// Decrypt (or fetch the cached) storage key for a drive.
    ///
    /// `Ok(None)` when this group cannot read the drive, carries no wrapped
    /// storage key for it, or has no key-store key.
    pub fn get_drive_storage_key(&self, drive_id: &DriveId) -> Result<Option<SymmetricKey>> {
        let Some(key_store_key) = self.key_store_key.as_ref() else {
            return Ok(None);
        };

        let Some(encrypted) = self
            .drive_grants
            .iter()
            .filter(|g| &g.drive_id == drive_id && g.permission().contains(DrivePermission::READ))
            .find_map(|g| g.key_store_key_encrypted_storage_key.as_ref())
        else {
            return Ok(None);
        };

        let mut cache = self
            .storage_keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(key) = cache.get(drive_id) {
            return Ok(Some(key.duplicate()));
        }

        let storage_key = encrypted.unwrap(key_store_key)?;
        let copy = storage_key.duplicate();
        cache.insert(*drive_id, storage_key);
        Ok(Some(copy))
    }
}

impl fmt::Debug for PermissionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionGroup")
            .field("permission_set", &self.permission_set)
            .field("drives", &self.drive_grants.len())
            .field("has_key_store_key", &self.key_store_key.is_some())
            .finish()
    }
}
