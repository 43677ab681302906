//! Drive records and the Drive Manager collaborator.
//!
//! The Drive Manager owns drive provisioning. The capability model only needs
//! to resolve public aliases to internal ids and read each drive's
//! master-key-wrapped storage key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use peerdrive_core::{now_millis, DriveId, EncryptedKey, SymmetricKey, TargetDrive};

use crate::error::{PermsError, Result};

/// A provisioned drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageDrive {
    pub id: DriveId,
    pub target_drive: TargetDrive,
    pub name: String,
    /// The drive's storage key wrapped under the tenant master key.
    pub master_key_encrypted_storage_key: EncryptedKey,
    pub allow_anonymous_reads: bool,
    /// Only the owner may access the drive; it can never be granted.
    pub owner_only: bool,
    /// Peers may ask for push notifications on files sent to this drive.
    pub allow_subscriptions: bool,
    pub created: i64,
}

/// Options for [`MemoryDriveManager::create_drive`].
#[derive(Debug, Clone, Default)]
pub struct CreateDriveRequest {
    pub name: String,
    pub target_drive: Option<TargetDrive>,
    pub allow_anonymous_reads: bool,
    pub owner_only: bool,
    pub allow_subscriptions: bool,
}

impl CreateDriveRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: TargetDrive) -> Self {
        self.target_drive = Some(target);
        self
    }

    pub fn with_anonymous_reads(mut self) -> Self {
        self.allow_anonymous_reads = true;
        self
    }

    pub fn with_owner_only(mut self) -> Self {
        self.owner_only = true;
        self
    }

    pub fn with_subscriptions(mut self) -> Self {
        self.allow_subscriptions = true;
        self
    }
}

/// Read access to drive records.
#[async_trait]
pub trait DriveManager: Send + Sync {
    /// Fetch a drive by internal id.
    async fn get_drive(&self, id: &DriveId) -> Result<Option<StorageDrive>>;

    /// Resolve a drive by its public (alias, type) pair.
    async fn get_drive_by_target(&self, target: &TargetDrive) -> Result<Option<StorageDrive>>;

    /// All drives that allow anonymous reads.
    async fn get_anonymous_drives(&self) -> Result<Vec<StorageDrive>>;

    /// All drives.
    async fn list_drives(&self) -> Result<Vec<StorageDrive>>;

    /// Resolve a target drive to its internal id.
    async fn get_drive_id(&self, target: &TargetDrive) -> Result<Option<DriveId>> {
        Ok(self.get_drive_by_target(target).await?.map(|d| d.id))
    }
}

/// In-memory drive manager.
#[derive(Default)]
pub struct MemoryDriveManager {
    drives: RwLock<HashMap<DriveId, StorageDrive>>,
}

impl MemoryDriveManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a drive with a fresh storage key wrapped under `master_key`.
    pub async fn create_drive(
        &self,
        master_key: &SymmetricKey,
        request: CreateDriveRequest,
    ) -> Result<StorageDrive> {
        let target_drive = request.target_drive.unwrap_or_else(TargetDrive::random);

        let mut drives = self.drives.write().await;
        if drives.values().any(|d| d.target_drive == target_drive) {
            return Err(PermsError::DriveManager(format!(
                "drive already exists for target {}",
                target_drive
            )));
        }

        let storage_key = SymmetricKey::generate();
        let drive = StorageDrive {
            id: DriveId::random(),
            target_drive,
            name: request.name,
            master_key_encrypted_storage_key: EncryptedKey::wrap(master_key, &storage_key)?,
            allow_anonymous_reads: request.allow_anonymous_reads,
            owner_only: request.owner_only,
            allow_subscriptions: request.allow_subscriptions,
            created: now_millis(),
        };

        tracing::debug!(drive_id = %drive.id, target = %drive.target_drive, "drive created");
        drives.insert(drive.id, drive.clone());
        Ok(drive)
    }
}

#[async_trait]
impl DriveManager for MemoryDriveManager {
    async fn get_drive(&self, id: &DriveId) -> Result<Option<StorageDrive>> {
        Ok(self.drives.read().await.get(id).cloned())
    }

    async fn get_drive_by_target(&self, target: &TargetDrive) -> Result<Option<StorageDrive>> {
        Ok(self
            .drives
            .read()
            .await
            .values()
            .find(|d| &d.target_drive == target)
            .cloned())
    }

    async fn get_anonymous_drives(&self) -> Result<Vec<StorageDrive>> {
        Ok(self
            .drives
            .read()
            .await
            .values()
            .filter(|d| d.allow_anonymous_reads)
            .cloned()
            .collect())
    }

    async fn list_drives(&self) -> Result<Vec<StorageDrive>> {
        Ok(self.drives.read().await.values().cloned().collect())
    }
}
