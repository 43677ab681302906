//! The transit perimeter: receives uploads from other identities.
//!
//! An upload runs `initialize → accept_part* → finalize`. Parts are streamed
//! into a temp file scoped to the resolved drive. On finalize the transfer is
//! either written straight to its drive or queued to the inbox; either way the
//! session is gone afterwards.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use peerdrive_core::{
    now_millis, ClientErrorCode, FileSystemType, GlobalTransitId, SessionId, TargetDrive,
    TransferInstructionType,
};
use peerdrive_perms::{DriveManager, RequestContext};
use peerdrive_store::QueueStore;

use crate::error::{Result, TransitError};
use crate::events::TransitEvent;
use crate::filesystem::FileSystemRules;
use crate::messages::{
    encode, FileMetadata, PartKind, TransferEnvelope, TransferInstructionSet, TransitResponseCode,
    INSTRUCTION_SET_EXTENSION, KEY_HEADER_EXTENSION, METADATA_EXTENSION,
};
use crate::router::{StagedTransfer, TransferRouter};
use crate::session::{IncomingTransferState, SessionMap, TransferPhase};

pub struct PeerPerimeter<D, Q> {
    router: Arc<TransferRouter<D, Q>>,
    sessions: SessionMap,
}

impl<D, Q> PeerPerimeter<D, Q>
where
    D: DriveManager + 'static,
    Q: QueueStore + 'static,
{
    pub fn new(router: Arc<TransferRouter<D, Q>>) -> Self {
        Self {
            router,
            sessions: SessionMap::new(),
        }
    }

    pub fn router(&self) -> &Arc<TransferRouter<D, Q>> {
        &self.router
    }

    pub fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Upload lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a session for an upload to the drive named in `instruction_set`.
    pub async fn initialize(
        &self,
        ctx: &RequestContext,
        instruction_set: TransferInstructionSet,
    ) -> Result<SessionId> {
        let sender = ctx.caller_or_fail()?.clone();
        instruction_set.validate()?;
        let drive_id = ctx.permissions.get_drive_id(&instruction_set.target_drive)?;

        let storage = self.router.storage();
        let temp_file = storage.create_temp_file(&drive_id).await?;
        storage
            .write_temp(
                &temp_file,
                INSTRUCTION_SET_EXTENSION,
                Bytes::from(encode(&instruction_set)?),
            )
            .await?;

        let now = now_millis();
        let id = self
            .sessions
            .insert(IncomingTransferState {
                id: SessionId::random(),
                sender,
                drive_id,
                temp_file,
                instruction_set,
                phase: TransferPhase::Initialized,
                parts: Default::default(),
                created: now,
                last_touched: now,
            })
            .await;

        tracing::debug!(session = %id, %drive_id, "perimeter session opened");
        Ok(id)
    }

    /// Stream one part into the session's temp file. Sending the same part
    /// kind again replaces it.
    ///
    /// A part longer than `max_part_bytes` is a client error and is not
    /// stored.
    pub async fn accept_part<R>(
        &self,
        ctx: &RequestContext,
        session_id: &SessionId,
        kind: PartKind,
        reader: R,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        kind.validate()?;
        let handle = self.sessions.get(session_id).await?;
        let mut state = handle.lock().await;
        assert_session_owner(ctx, &state)?;

        let extension = kind.extension();
        let limit = self.router.config().max_part_bytes;
        let mut data = Vec::new();
        reader
            .take(limit.saturating_add(1))
            .read_to_end(&mut data)
            .await
            .map_err(|e| TransitError::client(ClientErrorCode::MissingUploadData, e.to_string()))?;
        if data.len() as u64 > limit {
            return Err(TransitError::client(
                ClientErrorCode::PayloadTooLarge,
                format!("part {} exceeds {} bytes", extension, limit),
            ));
        }

        self.router
            .storage()
            .write_temp(&state.temp_file, &extension, Bytes::from(data))
            .await?;

        tracing::trace!(session = %session_id, %extension, "part accepted");
        state.parts.insert(extension);
        state.phase = TransferPhase::PartAccepted;
        state.last_touched = now_millis();
        Ok(())
    }

    /// Complete an upload: write it now or queue it to the inbox.
    ///
    /// The session is removed whatever the outcome. On error its temp file
    /// is discarded too.
    pub async fn finalize(
        &self,
        ctx: &RequestContext,
        session_id: &SessionId,
        metadata: FileMetadata,
    ) -> Result<TransitResponseCode> {
        let handle = self.sessions.get(session_id).await?;
        let mut state = handle.lock().await;
        assert_session_owner(ctx, &state)?;
        state.phase = TransferPhase::Finalizing;

        let result = self.finalize_locked(ctx, &state, &metadata).await;
        let temp_file = state.temp_file;
        drop(state);
        self.sessions.remove(session_id).await;

        match &result {
            Ok(code) => {
                tracing::info!(session = %session_id, ?code, "transfer finalized");
            }
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, kind = ?e.kind(), "transfer rejected");
                if let Err(cleanup) = self.router.storage().delete_temp_files(&temp_file).await {
                    tracing::warn!(session = %session_id, error = %cleanup, "temp cleanup failed");
                }
            }
        }
        result
    }

    async fn finalize_locked(
        &self,
        ctx: &RequestContext,
        state: &IncomingTransferState,
        metadata: &FileMetadata,
    ) -> Result<TransitResponseCode> {
        let instruction_set = &state.instruction_set;
        instruction_set
            .file_system_type
            .assert_can_write(&ctx.permissions, &state.drive_id)?;

        self.router.validate_metadata(instruction_set, metadata)?;
        for extension in metadata.expected_extensions(instruction_set.contents_provided) {
            if !state.has_part(&extension) {
                return Err(TransitError::client(
                    ClientErrorCode::NotAllPayloadsReceived,
                    format!("missing part {}", extension),
                ));
            }
        }
        if metadata.is_encrypted && !state.has_part(KEY_HEADER_EXTENSION) {
            return Err(TransitError::client(
                ClientErrorCode::MissingUploadData,
                "encrypted transfer without a key header",
            ));
        }
        self.router
            .assert_notification_allowed(&state.drive_id, instruction_set)
            .await?;

        self.router
            .storage()
            .write_temp(&state.temp_file, METADATA_EXTENSION, Bytes::from(encode(metadata)?))
            .await?;

        let staged = StagedTransfer {
            sender: &state.sender,
            drive_id: state.drive_id,
            temp_file: state.temp_file,
            instruction_set,
            metadata,
        };

        let (code, file) = match self.router.try_direct_write(ctx, &staged).await? {
            Some(file) => (TransitResponseCode::AcceptedDirectWrite, file),
            None => {
                self.router.route_to_inbox(&staged).await?;
                (TransitResponseCode::AcceptedIntoInbox, state.temp_file)
            }
        };
        self.router.notify_accepted(&staged, file).await;
        Ok(code)
    }

    /// Run a whole envelope through initialize, every part, and finalize.
    pub async fn accept_envelope(
        &self,
        ctx: &RequestContext,
        envelope: TransferEnvelope,
    ) -> Result<TransitResponseCode> {
        let session_id = self.initialize(ctx, envelope.instruction_set).await?;
        for part in &envelope.parts {
            if let Err(e) = self
                .accept_part(ctx, &session_id, part.kind.clone(), &part.data[..])
                .await
            {
                self.abandon(&session_id).await;
                return Err(e);
            }
        }
        self.finalize(ctx, &session_id, envelope.metadata).await
    }

    async fn abandon(&self, session_id: &SessionId) {
        if let Some(handle) = self.sessions.remove(session_id).await {
            let temp_file = handle.lock().await.temp_file;
            if let Err(e) = self.router.storage().delete_temp_files(&temp_file).await {
                tracing::warn!(session = %session_id, error = %e, "temp cleanup failed");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Linked files
    // ─────────────────────────────────────────────────────────────────────────

    /// Delete a file the caller previously sent.
    ///
    /// Comments are deleted on the spot and only by their author. Other files
    /// are queued for the inbox.
    pub async fn accept_delete_linked_file_request(
        &self,
        ctx: &RequestContext,
        target: &TargetDrive,
        global_transit_id: GlobalTransitId,
        file_system_type: FileSystemType,
    ) -> Result<TransitResponseCode> {
        let caller = ctx.caller_or_fail()?.clone();
        let drive_id = ctx.permissions.get_drive_id(target)?;
        file_system_type.assert_can_write(&ctx.permissions, &drive_id)?;

        if file_system_type.may_queue_to_inbox() {
            self.router
                .queue_instruction(
                    &caller,
                    drive_id,
                    TransferInstructionType::DeleteLinkedFile,
                    file_system_type,
                    global_transit_id,
                )
                .await?;
            return Ok(TransitResponseCode::AcceptedIntoInbox);
        }

        let storage = self.router.storage();
        let file = storage
            .get_file_by_global_transit_id(&drive_id, &global_transit_id)
            .await?
            .ok_or_else(|| {
                TransitError::client(
                    ClientErrorCode::InvalidGlobalTransitId,
                    format!("no file with global transit id {}", global_transit_id),
                )
            })?;
        if file.sender.as_ref() != Some(&caller) {
            return Err(TransitError::security("only the author may delete a comment"));
        }

        storage.soft_delete(&file.file).await?;
        tracing::info!(%drive_id, file_id = %file.file.file_id, sender = %caller, "comment deleted");
        self.router
            .events()
            .publish(TransitEvent::LinkedFileDeleted {
                file: file.file,
                sender: caller,
                global_transit_id,
            })
            .await;
        Ok(TransitResponseCode::AcceptedDirectWrite)
    }

    /// Record that the caller has read a file; applied by the next inbox pass.
    pub async fn mark_file_as_read(
        &self,
        ctx: &RequestContext,
        target: &TargetDrive,
        global_transit_id: GlobalTransitId,
        file_system_type: FileSystemType,
    ) -> Result<TransitResponseCode> {
        let caller = ctx.caller_or_fail()?.clone();
        let drive_id = ctx.permissions.get_drive_id(target)?;
        file_system_type.assert_can_write(&ctx.permissions, &drive_id)?;

        self.router
            .queue_instruction(
                &caller,
                drive_id,
                TransferInstructionType::ReadReceipt,
                file_system_type,
                global_transit_id,
            )
            .await?;
        Ok(TransitResponseCode::AcceptedIntoInbox)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expiry
    // ─────────────────────────────────────────────────────────────────────────

    /// Drop sessions idle longer than the configured TTL. Returns how many
    /// were removed.
    pub async fn sweep_expired_sessions(&self, now: i64) -> usize {
        let idle_before = now.saturating_sub(self.router.config().session_ttl_ms);
        let expired = self.sessions.take_expired(idle_before).await;

        for (session_id, temp_file) in &expired {
            tracing::debug!(session = %session_id, "perimeter session expired");
            if let Err(e) = self.router.storage().delete_temp_files(temp_file).await {
                tracing::warn!(session = %session_id, error = %e, "temp cleanup failed");
            }
        }
        expired.len()
    }

    /// Run [`sweep_expired_sessions`](Self::sweep_expired_sessions) every
    /// `every` until the returned handle is aborted.
    pub fn spawn_session_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let perimeter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let swept = perimeter.sweep_expired_sessions(now_millis()).await;
                if swept > 0 {
                    tracing::info!(swept, "expired perimeter sessions removed");
                }
            }
        })
    }
}

fn assert_session_owner(ctx: &RequestContext, state: &IncomingTransferState) -> Result<()> {
    match &ctx.caller {
        Some(caller) if caller == &state.sender => Ok(()),
        _ => Err(TransitError::security("session belongs to another sender")),
    }
}
