//! In-memory perimeter sessions.
//!
//! A session exists from `initialize` until `finalize` (or until it expires).
//! Nothing here is persisted: a restart loses every session and senders must
//! upload again.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use peerdrive_core::{DriveId, IdentityId, InternalDriveFileId, SessionId};

use crate::error::{Result, TransitError};
use crate::messages::TransferInstructionSet;

/// Where an upload is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Initialized,
    PartAccepted,
    Finalizing,
}

#[derive(Debug)]
pub struct IncomingTransferState {
    pub id: SessionId,
    pub sender: IdentityId,
    pub drive_id: DriveId,
    pub temp_file: InternalDriveFileId,
    pub instruction_set: TransferInstructionSet,
    pub phase: TransferPhase,
    /// Extensions uploaded so far.
    pub parts: BTreeSet<String>,
    pub created: i64,
    pub last_touched: i64,
}

impl IncomingTransferState {
    pub fn has_part(&self, extension: &str) -> bool {
        self.parts.contains(extension)
    }
}

pub type SessionHandle = Arc<Mutex<IncomingTransferState>>;

/// Concurrent map of live sessions.
#[derive(Default)]
pub struct SessionMap {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, state: IncomingTransferState) -> SessionId {
        let id = state.id;
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(state)));
        id
    }

    pub async fn get(&self, id: &SessionId) -> Result<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(TransitError::SessionNotFound(*id))
    }

    pub async fn remove(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove sessions idle since before `idle_before` and return their temp
    /// files. Sessions that are mid-operation are skipped.
    pub async fn take_expired(&self, idle_before: i64) -> Vec<(SessionId, InternalDriveFileId)> {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();

        for (id, handle) in sessions.iter() {
            if let Ok(state) = handle.try_lock() {
                if state.last_touched < idle_before {
                    expired.push((*id, state.temp_file));
                }
            }
        }
        for (id, _) in &expired {
            sessions.remove(id);
        }
        expired
    }
}
