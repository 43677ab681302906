//! Drive Storage collaborator: temp files for uploads and long-term file
//! records.
//!
//! Long-term files are keyed by `(drive, global transit id)` so that applying
//! the same transfer twice updates the existing file instead of creating a
//! second one.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use peerdrive_core::{
    now_millis, DriveId, EncryptedKey, FileId, FileSystemType, GlobalTransitId, IdentityId,
    InternalDriveFileId,
};

use crate::error::{Result, TransitError};
use crate::messages::FileMetadata;

/// A file committed to a drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub file: InternalDriveFileId,
    pub global_transit_id: Option<GlobalTransitId>,
    /// The identity that sent the file, if it arrived over transit.
    pub sender: Option<IdentityId>,
    pub file_system_type: FileSystemType,
    pub metadata: FileMetadata,
    /// Key header sealed under the drive's storage key.
    pub key_header: Option<EncryptedKey>,
    /// Payload and thumbnail bytes keyed by part extension.
    pub payloads: BTreeMap<String, Bytes>,
    pub created: i64,
    pub updated: i64,
    pub is_deleted: bool,
    pub read_by: BTreeSet<IdentityId>,
}

/// Input to [`DriveStorage::commit_file`].
#[derive(Debug, Clone)]
pub struct NewFile {
    pub drive_id: DriveId,
    pub global_transit_id: Option<GlobalTransitId>,
    pub sender: Option<IdentityId>,
    pub file_system_type: FileSystemType,
    pub metadata: FileMetadata,
    pub key_header: Option<EncryptedKey>,
    pub payloads: BTreeMap<String, Bytes>,
}

/// Result of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Created(InternalDriveFileId),
    Updated(InternalDriveFileId),
}

impl CommitOutcome {
    pub fn file(&self) -> InternalDriveFileId {
        match self {
            CommitOutcome::Created(f) | CommitOutcome::Updated(f) => *f,
        }
    }
}

#[async_trait]
pub trait DriveStorage: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Temp storage
    // ─────────────────────────────────────────────────────────────────────────

    /// Allocate a temp file handle on the drive.
    async fn create_temp_file(&self, drive_id: &DriveId) -> Result<InternalDriveFileId>;

    /// Write (or overwrite) one extension of a temp file.
    async fn write_temp(&self, file: &InternalDriveFileId, extension: &str, data: Bytes) -> Result<()>;

    async fn read_temp(&self, file: &InternalDriveFileId, extension: &str) -> Result<Option<Bytes>>;

    async fn temp_extensions(&self, file: &InternalDriveFileId) -> Result<Vec<String>>;

    /// Delete every extension of a temp file. Missing files are not an error.
    async fn delete_temp_files(&self, file: &InternalDriveFileId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Long-term storage
    // ─────────────────────────────────────────────────────────────────────────

    /// Create or update a file.
    ///
    /// A file with the same global transit id on the same drive is updated in
    /// place. Updating a file that was sent by someone else is a security
    /// error.
    async fn commit_file(&self, file: NewFile) -> Result<CommitOutcome>;

    async fn get_file(&self, file: &InternalDriveFileId) -> Result<Option<StoredFile>>;

    async fn get_file_by_global_transit_id(
        &self,
        drive_id: &DriveId,
        global_transit_id: &GlobalTransitId,
    ) -> Result<Option<StoredFile>>;

    /// Files on a drive that are not deleted.
    async fn list_files(&self, drive_id: &DriveId) -> Result<Vec<StoredFile>>;

    async fn soft_delete(&self, file: &InternalDriveFileId) -> Result<bool>;

    /// Record that `reader` has read the file.
    async fn mark_read(&self, file: &InternalDriveFileId, reader: &IdentityId) -> Result<bool>;
}

/// In-memory drive storage.
#[derive(Default)]
pub struct MemoryDriveStorage {
    inner: RwLock<MemoryStorageInner>,
}

#[derive(Default)]
struct MemoryStorageInner {
    temp: HashMap<InternalDriveFileId, BTreeMap<String, Bytes>>,
    files: HashMap<InternalDriveFileId, StoredFile>,
}

impl MemoryDriveStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of temp files currently allocated.
    pub async fn temp_file_count(&self) -> usize {
        self.inner.read().await.temp.len()
    }
}

#[async_trait]
impl DriveStorage for MemoryDriveStorage {
    async fn create_temp_file(&self, drive_id: &DriveId) -> Result<InternalDriveFileId> {
        let file = InternalDriveFileId {
            drive_id: *drive_id,
            file_id: FileId::random(),
        };
        self.inner.write().await.temp.insert(file, BTreeMap::new());
        Ok(file)
    }

    async fn write_temp(&self, file: &InternalDriveFileId, extension: &str, data: Bytes) -> Result<()> {
        let mut inner = self.inner.write().await;
        let parts = inner
            .temp
            .get_mut(file)
            .ok_or_else(|| TransitError::system(format!("temp file {:?} not allocated", file)))?;
        parts.insert(extension.to_string(), data);
        Ok(())
    }

    async fn read_temp(&self, file: &InternalDriveFileId, extension: &str) -> Result<Option<Bytes>> {
        Ok(self
            .inner
            .read()
            .await
            .temp
            .get(file)
            .and_then(|parts| parts.get(extension).cloned()))
    }

    async fn temp_extensions(&self, file: &InternalDriveFileId) -> Result<Vec<String>> {
        Ok(self
            .inner
            .read()
            .await
            .temp
            .get(file)
            .map(|parts| parts.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_temp_files(&self, file: &InternalDriveFileId) -> Result<()> {
        self.inner.write().await.temp.remove(file);
        Ok(())
    }

    async fn commit_file(&self, new: NewFile) -> Result<CommitOutcome> {
        let now = now_millis();
        let mut inner = self.inner.write().await;

        let existing = new.global_transit_id.and_then(|gtid| {
            inner
                .files
                .values()
                .find(|f| f.file.drive_id == new.drive_id && f.global_transit_id == Some(gtid))
                .map(|f| f.file)
        });

        if let Some(id) = existing {
            let file = inner
                .files
                .get_mut(&id)
                .ok_or_else(|| TransitError::system("file vanished during commit"))?;
            if file.sender != new.sender {
                return Err(TransitError::security(
                    "global transit id belongs to a file from another sender",
                ));
            }
            file.file_system_type = new.file_system_type;
            file.metadata = new.metadata;
            file.key_header = new.key_header;
            file.payloads = new.payloads;
            file.updated = now;
            file.is_deleted = false;
            return Ok(CommitOutcome::Updated(id));
        }

        let id = InternalDriveFileId {
            drive_id: new.drive_id,
            file_id: FileId::random(),
        };
        inner.files.insert(
            id,
            StoredFile {
                file: id,
                global_transit_id: new.global_transit_id,
                sender: new.sender,
                file_system_type: new.file_system_type,
                metadata: new.metadata,
                key_header: new.key_header,
                payloads: new.payloads,
                created: now,
                updated: now,
                is_deleted: false,
                read_by: BTreeSet::new(),
            },
        );
        Ok(CommitOutcome::Created(id))
    }

    async fn get_file(&self, file: &InternalDriveFileId) -> Result<Option<StoredFile>> {
        Ok(self.inner.read().await.files.get(file).cloned())
    }

    async fn get_file_by_global_transit_id(
        &self,
        drive_id: &DriveId,
        global_transit_id: &GlobalTransitId,
    ) -> Result<Option<StoredFile>> {
        Ok(self
            .inner
            .read()
            .await
            .files
            .values()
            .find(|f| {
                f.file.drive_id == *drive_id && f.global_transit_id.as_ref() == Some(global_transit_id)
            })
            .cloned())
    }

    async fn list_files(&self, drive_id: &DriveId) -> Result<Vec<StoredFile>> {
        let inner = self.inner.read().await;
        let mut files: Vec<StoredFile> = inner
            .files
            .values()
            .filter(|f| f.file.drive_id == *drive_id && !f.is_deleted)
            .cloned()
            .collect();
        files.sort_by_key(|f| (f.created, f.file.file_id));
        Ok(files)
    }

    async fn soft_delete(&self, file: &InternalDriveFileId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.files.get_mut(file) {
            Some(f) if !f.is_deleted => {
                f.is_deleted = true;
                f.updated = now_millis();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_read(&self, file: &InternalDriveFileId, reader: &IdentityId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.files.get_mut(file) {
            Some(f) => Ok(f.read_by.insert(reader.clone())),
            None => Ok(false),
        }
    }
}
