//! Permission contexts: per-request evaluation of everything a caller holds.
//!
//! A [`PermissionContext`] is a named list of [`PermissionGroup`]s plus the
//! caller's decrypted shared secret. It is rebuilt for every request and never
//! persisted. Checks are a logical OR over the groups: a right is held if
//! *any* group grants it. Groups are kept separate (not merged) so that
//! [`PermissionContext::granting_groups`] can report which grant authorized
//! an action.

use peerdrive_core::{DriveId, IdentityId, SymmetricKey, TargetDrive};

use crate::error::{PermsError, Result};
use crate::group::PermissionGroup;
use crate::permission::{DrivePermission, PermissionKey};

/// How the caller authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthContext {
    Owner,
    App,
    Guest,
    /// A verified connection from another identity's transit perimeter.
    PeerTransit,
}

/// A permission group with the name of the grant it came from.
#[derive(Debug)]
pub struct NamedGroup {
    pub name: String,
    pub group: PermissionGroup,
}

/// Request-scoped aggregate of permission groups.
#[derive(Debug, Default)]
pub struct PermissionContext {
    groups: Vec<NamedGroup>,
    shared_secret: Option<SymmetricKey>,
}

impl PermissionContext {
    pub fn new(groups: Vec<NamedGroup>, shared_secret: Option<SymmetricKey>) -> Self {
        Self {
            groups,
            shared_secret,
        }
    }

    /// A context that grants nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.name.as_str())
    }

    pub fn shared_secret(&self) -> Option<&SymmetricKey> {
        self.shared_secret.as_ref()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Drive checks
    // ─────────────────────────────────────────────────────────────────────────

    pub fn has_drive_permission(&self, drive_id: &DriveId, permission: DrivePermission) -> bool {
        self.groups
            .iter()
            .any(|g| g.group.has_drive_permission(drive_id, permission))
    }

    /// Names of every group that grants `permission` on the drive.
    pub fn granting_groups(&self, drive_id: &DriveId, permission: DrivePermission) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|g| g.group.has_drive_permission(drive_id, permission))
            .map(|g| g.name.as_str())
            .collect()
    }

    pub fn assert_has_drive_permission(
        &self,
        drive_id: &DriveId,
        permission: DrivePermission,
    ) -> Result<()> {
        if self.has_drive_permission(drive_id, permission) {
            return Ok(());
        }
        Err(PermsError::security(format!(
            "missing {:?} on drive {}",
            permission, drive_id
        )))
    }

    pub fn assert_can_read_drive(&self, drive_id: &DriveId) -> Result<()> {
        self.assert_has_drive_permission(drive_id, DrivePermission::READ)
    }

    pub fn assert_can_write_drive(&self, drive_id: &DriveId) -> Result<()> {
        self.assert_has_drive_permission(drive_id, DrivePermission::WRITE)
    }

    /// Succeeds if any group holds at least one of the flags in `any_of`.
    pub fn assert_has_any_drive_permission(
        &self,
        drive_id: &DriveId,
        any_of: DrivePermission,
    ) -> Result<()> {
        let held = self.groups.iter().any(|g| {
            any_of.intersects(g.group.drive_permission(drive_id))
        });
        if held {
            return Ok(());
        }
        Err(PermsError::security(format!(
            "none of {:?} held on drive {}",
            any_of, drive_id
        )))
    }

    /// Resolve a public drive reference against the caller's grants.
    pub fn get_drive_id(&self, target: &TargetDrive) -> Result<DriveId> {
        self.groups
            .iter()
            .flat_map(|g| g.group.drive_grants())
            .find(|dg| &dg.permissioned_drive.drive == target)
            .map(|dg| dg.drive_id)
            .ok_or_else(|| {
                PermsError::security(format!("no access to drive {}", target))
            })
    }

    /// A live storage key for the drive from any group that can read it.
    ///
    /// Errors while unwrapping are logged and treated as "no key"; callers
    /// always have a fallback path.
    pub fn try_get_drive_storage_key(&self, drive_id: &DriveId) -> Option<SymmetricKey> {
        self.groups
            .iter()
            .filter(|g| g.group.mentions_drive(drive_id))
            .find_map(|g| match g.group.get_drive_storage_key(drive_id) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(group = %g.name, %drive_id, error = %e, "storage key unwrap failed");
                    None
                }
            })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permission keys
    // ─────────────────────────────────────────────────────────────────────────

    pub fn has_permission(&self, key: PermissionKey) -> bool {
        self.groups.iter().any(|g| g.group.has_permission(key))
    }

    pub fn assert_has_permission(&self, key: PermissionKey) -> Result<()> {
        if self.has_permission(key) {
            return Ok(());
        }
        Err(PermsError::security(format!("missing permission {:?}", key)))
    }
}

/// Everything known about the caller of one request.
#[derive(Debug)]
pub struct RequestContext {
    /// The identity this request is being served by.
    pub tenant: IdentityId,
    /// The calling identity, when the caller is another identity.
    pub caller: Option<IdentityId>,
    pub auth: AuthContext,
    pub permissions: PermissionContext,
}

impl RequestContext {
    pub fn new(
        tenant: IdentityId,
        caller: Option<IdentityId>,
        auth: AuthContext,
        permissions: PermissionContext,
    ) -> Self {
        Self {
            tenant,
            caller,
            auth,
            permissions,
        }
    }

    pub fn caller_or_fail(&self) -> Result<&IdentityId> {
        self.caller
            .as_ref()
            .ok_or_else(|| PermsError::security("caller identity required"))
    }

    pub fn is_peer_transit(&self) -> bool {
        self.auth == AuthContext::PeerTransit
    }
}
