//! Write rules per file-system flavor.

use peerdrive_core::{DriveId, FileSystemType};
use peerdrive_perms::{DrivePermission, PermissionContext};

use crate::error::Result;

/// How a [`FileSystemType`] is gated and routed.
pub trait FileSystemRules {
    /// Flags that allow a write. Holding any one of them is enough.
    fn write_permission(&self) -> DrivePermission;

    /// Whether a transfer that cannot be written immediately may wait in the
    /// inbox.
    fn may_queue_to_inbox(&self) -> bool;

    /// Whether the metadata must reference another file.
    fn requires_referenced_file(&self) -> bool;

    fn assert_can_write(&self, permissions: &PermissionContext, drive_id: &DriveId) -> Result<()> {
        permissions.assert_has_any_drive_permission(drive_id, self.write_permission())?;
        Ok(())
    }
}

impl FileSystemRules for FileSystemType {
    fn write_permission(&self) -> DrivePermission {
        match self {
            FileSystemType::Standard => DrivePermission::WRITE,
            FileSystemType::Comment => DrivePermission::COMMENT | DrivePermission::WRITE,
        }
    }

    fn may_queue_to_inbox(&self) -> bool {
        // A comment is bound to its author and must be verified on arrival.
        matches!(self, FileSystemType::Standard)
    }

    fn requires_referenced_file(&self) -> bool {
        matches!(self, FileSystemType::Comment)
    }
}
