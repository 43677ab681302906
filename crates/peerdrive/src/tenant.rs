//! The Tenant: one identity's drives, connections, and transit queues.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use peerdrive_core::{
    now_millis, ErrorKind, FileSystemType, GlobalTransitId, IdentityId, InternalDriveFileId,
    SymmetricKey, TargetDrive,
};
use peerdrive_perms::{
    AuthContext, ClientAccessToken, ClientAuthenticationToken, ClientTokenType,
    CreateDriveRequest, DriveGrantRequest, DriveManager, ExchangeGrantService,
    MemoryDriveManager, PermissionContextOptions, PermissionSet, PermsError, RequestContext,
    StorageDrive,
};
use peerdrive_store::{OutboxItem, OutboxItemKind, QueueStatus, QueueStore};
use peerdrive_transit::messages::encode;
use peerdrive_transit::{
    AppNotificationOptions, DeliveryReport, DriveStorage, EnvelopePart, EventBus, FileMetadata,
    InboxProcessor, KeyHeader, NewFile, OutboxProcessor, PartKind, PeerEndpoint, PeerPerimeter,
    PeerTransport, PushNotification, RecipientTokens, TransferEnvelope, TransferInstructionSet,
    TransferRouter, TransferStatus, TransitError, TransitEvent, TransitResponseCode,
};

use crate::config::TenantConfig;
use crate::connections::{connection_grant_name, ConnectionRegistry};
use crate::error::{Result, TenantError};

/// A file to store locally and send to peers.
#[derive(Debug)]
pub struct OutgoingFile {
    /// Our drive that keeps the sender's copy.
    pub source: TargetDrive,
    /// The drive each recipient should write the file to.
    pub destination: TargetDrive,
    pub file_system_type: FileSystemType,
    /// A missing global transit id is generated.
    pub metadata: FileMetadata,
    /// Payload and thumbnail parts only.
    pub parts: Vec<EnvelopePart>,
    /// Required exactly when `metadata.is_encrypted`.
    pub key_header: Option<KeyHeader>,
    pub app_notification: Option<AppNotificationOptions>,
}

/// Result of [`Tenant::send_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// The sender's local copy.
    pub file: InternalDriveFileId,
    pub global_transit_id: GlobalTransitId,
    pub recipients: BTreeMap<IdentityId, TransferStatus>,
}

/// One identity's view of the network.
///
/// Brings together:
/// - drives and the owner's master key
/// - connections issued to and accepted from peers
/// - the perimeter peers upload into
/// - the inbox and outbox workers
pub struct Tenant<S: QueueStore + 'static, D: DriveManager + 'static> {
    identity: IdentityId,
    master_key: Arc<SymmetricKey>,
    config: TenantConfig,
    grants: ExchangeGrantService<D>,
    router: Arc<TransferRouter<D, S>>,
    perimeter: Arc<PeerPerimeter<D, S>>,
    inbox: InboxProcessor<D, S>,
    outbox: OutboxProcessor<S>,
    connections: Arc<ConnectionRegistry>,
}

impl<S: QueueStore + 'static, D: DriveManager + 'static> Tenant<S, D> {
    pub fn new(
        identity: IdentityId,
        master_key: SymmetricKey,
        config: TenantConfig,
        drives: Arc<D>,
        storage: Arc<dyn DriveStorage>,
        events: Arc<dyn EventBus>,
        queues: Arc<S>,
    ) -> Self {
        let master_key = Arc::new(master_key);
        let router = Arc::new(TransferRouter::new(
            identity.clone(),
            config.transit(),
            Arc::clone(&drives),
            storage,
            events,
            queues,
        ));

        Self {
            inbox: InboxProcessor::new(Arc::clone(&router), config.inbox_retry),
            outbox: OutboxProcessor::new(
                identity.clone(),
                router.outbox().clone(),
                config.outbox_retry,
            ),
            perimeter: Arc::new(PeerPerimeter::new(Arc::clone(&router))),
            connections: Arc::new(ConnectionRegistry::new(Arc::clone(&master_key))),
            grants: ExchangeGrantService::new(drives),
            identity,
            master_key,
            config,
            router,
        }
    }

    pub fn identity(&self) -> &IdentityId {
        &self.identity
    }

    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn DriveStorage> {
        self.router.storage()
    }

    pub fn perimeter(&self) -> &Arc<PeerPerimeter<D, S>> {
        &self.perimeter
    }

    pub fn connections(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.connections)
    }

    /// The owner's context over every current drive, unlocked.
    pub async fn owner_context(&self) -> Result<RequestContext> {
        let permissions = self.grants.create_owner_context(&self.master_key).await?;
        Ok(RequestContext::new(
            self.identity.clone(),
            None,
            AuthContext::Owner,
            permissions,
        ))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────────

    /// Let `peer` write to (and read from) the requested drives.
    ///
    /// Read grants carry the drive's storage key, so a peer holding one can
    /// have encrypted files written straight to the drive. The returned token
    /// is handed to the peer once and never stored here.
    pub async fn connect(
        &self,
        peer: IdentityId,
        drives: &[DriveGrantRequest],
        permissions: PermissionSet,
    ) -> Result<ClientAccessToken> {
        let key_store_key = SymmetricKey::generate();
        let grant = self
            .grants
            .create_exchange_grant(
                &key_store_key,
                permissions,
                drives,
                Some(self.master_key.as_ref()),
                None,
            )
            .await?;
        let (registration, token) = self.grants.create_client_access_token(
            Some(&key_store_key),
            ClientTokenType::Transit,
            None,
        )?;

        self.connections
            .record_issued(peer.clone(), grant, registration, &token.shared_secret)
            .await?;
        tracing::info!(%peer, drives = drives.len(), "connection issued");
        Ok(token)
    }

    /// Keep the token `peer` issued to us so we can send to them.
    pub async fn accept_connection(&self, peer: IdentityId, token: &ClientAccessToken) -> Result<()> {
        self.connections.record_accepted(peer.clone(), token).await?;
        tracing::info!(%peer, "connection accepted");
        Ok(())
    }

    /// Revoke everything issued to `peer`. Their next transfer is refused.
    pub async fn revoke_connection(&self, peer: &IdentityId) -> Result<()> {
        if !self.connections.revoke(peer).await {
            return Err(TenantError::NotConnected(peer.clone()));
        }
        tracing::info!(%peer, "connection revoked");
        Ok(())
    }

    /// The context a connected peer acts under when presenting `token`.
    pub async fn peer_context(
        &self,
        sender: &IdentityId,
        token: &ClientAuthenticationToken,
    ) -> Result<RequestContext> {
        if token.token_type != ClientTokenType::Transit {
            return Err(PermsError::security("peer transfers need a transit token").into());
        }
        let (grant, registration) = self
            .connections
            .issued(sender)
            .await
            .ok_or_else(|| TenantError::NotConnected(sender.clone()))?;

        let mut grants = BTreeMap::new();
        grants.insert(connection_grant_name(sender), grant);
        let permissions = self
            .grants
            .create_permission_context(
                token,
                &grants,
                &registration,
                &PermissionContextOptions::default(),
            )
            .await?;

        Ok(RequestContext::new(
            self.identity.clone(),
            Some(sender.clone()),
            AuthContext::PeerTransit,
            permissions,
        ))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────────────────

    /// Store `file` on our own drive and queue one delivery per recipient.
    ///
    /// Each recipient gets the key header sealed under its own connection
    /// secret. Recipients we hold no token for are reported as
    /// `RecipientNotConnected` and get no outbox item.
    pub async fn send_file(
        &self,
        mut file: OutgoingFile,
        recipients: &[IdentityId],
        priority: i64,
    ) -> Result<SendReport> {
        if file.metadata.is_encrypted != file.key_header.is_some() {
            return Err(TenantError::InvalidFile(
                "a key header is required exactly when the file is encrypted".into(),
            ));
        }
        if let Some(part) = file
            .parts
            .iter()
            .find(|p| !matches!(p.kind, PartKind::Payload { .. } | PartKind::Thumbnail { .. }))
        {
            return Err(TenantError::InvalidFile(format!(
                "unexpected part {:?}",
                part.kind
            )));
        }
        let global_transit_id = *file
            .metadata
            .global_transit_id
            .get_or_insert_with(GlobalTransitId::random);

        let local = self.store_local_copy(&file, global_transit_id).await?;

        let mut instruction_set =
            TransferInstructionSet::save_file(file.destination, file.file_system_type);
        if let Some(options) = file.app_notification.take() {
            instruction_set = instruction_set.with_notification(options);
        }
        let mut envelope = TransferEnvelope::new(instruction_set, file.metadata.clone());
        envelope.parts = file.parts.clone();

        let now = now_millis();
        let mut statuses = BTreeMap::new();
        for recipient in recipients {
            let secret = match self.connections.outbound_secret(recipient).await {
                Ok(secret) => secret,
                Err(TenantError::NotConnected(_)) => {
                    tracing::warn!(%recipient, "not connected, file not queued");
                    statuses.insert(recipient.clone(), TransferStatus::RecipientNotConnected);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut outgoing = envelope.clone();
            let status = match &file.key_header {
                Some(header) => {
                    outgoing.set_key_header(&header.seal(&secret)?)?;
                    TransferStatus::TransferKeyCreated
                }
                None => TransferStatus::Enqueued,
            };

            let item = OutboxItem::new(
                local,
                recipient.clone(),
                OutboxItemKind::File,
                encode(&outgoing)?,
                now,
            )
            .with_priority(priority);
            self.router.outbox().push(&item, true).await?;
            statuses.insert(recipient.clone(), status);
        }

        tracing::info!(
            file = %local.file_id,
            gtid = %global_transit_id,
            recipients = recipients.len(),
            "file queued for delivery"
        );
        Ok(SendReport {
            file: local,
            global_transit_id,
            recipients: statuses,
        })
    }

    async fn store_local_copy(
        &self,
        file: &OutgoingFile,
        global_transit_id: GlobalTransitId,
    ) -> Result<InternalDriveFileId> {
        let ctx = self.owner_context().await?;
        let drive_id = ctx.permissions.get_drive_id(&file.source)?;

        let key_header = match &file.key_header {
            Some(header) => {
                let storage_key = ctx
                    .permissions
                    .try_get_drive_storage_key(&drive_id)
                    .ok_or_else(|| TenantError::InvalidFile("source drive is locked".into()))?;
                Some(header.seal(&storage_key)?)
            }
            None => None,
        };
        let payloads: BTreeMap<String, Bytes> = file
            .parts
            .iter()
            .map(|p| (p.kind.extension(), p.data.clone()))
            .collect();

        let outcome = self
            .storage()
            .commit_file(NewFile {
                drive_id,
                global_transit_id: Some(global_transit_id),
                sender: None,
                file_system_type: file.file_system_type,
                metadata: file.metadata.clone(),
                key_header,
                payloads,
            })
            .await?;
        Ok(outcome.file())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Workers
    // ─────────────────────────────────────────────────────────────────────────

    /// Deliver one batch of due outbox items.
    pub async fn process_outbox(
        &self,
        transport: Arc<dyn PeerTransport>,
        tokens: Arc<dyn RecipientTokens>,
    ) -> Result<Vec<DeliveryReport>> {
        Ok(self
            .outbox
            .process_batch(self.config.outbox_batch_size, transport, tokens)
            .await?)
    }

    /// Work through a drive's inbox as the owner.
    pub async fn process_inbox(
        &self,
        target: &TargetDrive,
        batch_size: Option<usize>,
    ) -> Result<QueueStatus> {
        let ctx = self.owner_context().await?;
        let batch_size = batch_size.unwrap_or(self.config.inbox_batch_size);
        Ok(self
            .inbox
            .process_inbox(&ctx, target, batch_size, self.connections.as_ref())
            .await?)
    }

    pub async fn inbox_status(&self, target: &TargetDrive) -> Result<QueueStatus> {
        let ctx = self.owner_context().await?;
        let drive_id = ctx.permissions.get_drive_id(target)?;
        Ok(self.router.inbox().status(Some(&drive_id.to_hex())).await?)
    }

    /// Release items popped longer ago than `stale_pop_after_ms`.
    pub async fn recover_stale_items(&self) -> Result<usize> {
        let popped_before = now_millis().saturating_sub(self.config.stale_pop_after_ms);
        let inbox = self.router.inbox().recover(popped_before).await?;
        let outbox = self.router.outbox().recover(popped_before).await?;
        if inbox + outbox > 0 {
            tracing::info!(inbox, outbox, "recovered stale queue items");
        }
        Ok(inbox + outbox)
    }

    /// Drop perimeter sessions idle past the TTL.
    pub async fn sweep_sessions(&self) -> usize {
        self.perimeter.sweep_expired_sessions(now_millis()).await
    }
}

impl<S: QueueStore + 'static> Tenant<S, MemoryDriveManager> {
    pub async fn create_drive(&self, request: CreateDriveRequest) -> Result<StorageDrive> {
        let drive = self
            .grants
            .drive_manager()
            .create_drive(&self.master_key, request)
            .await?;
        tracing::info!(drive_id = %drive.id, target = %drive.target_drive, "drive created");
        Ok(drive)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Receiving
// ─────────────────────────────────────────────────────────────────────────────

fn into_transit(e: TenantError) -> TransitError {
    match e {
        TenantError::Transit(e) => e,
        TenantError::Permission(e) => e.into(),
        TenantError::Core(e) => e.into(),
        TenantError::Store(e) => e.into(),
        other => TransitError::system(other.to_string()),
    }
}

/// Security failures become `AccessDenied` and client failures `Rejected`.
/// System failures stay errors so the sender retries.
fn respond(
    sender: &IdentityId,
    result: peerdrive_transit::Result<TransitResponseCode>,
) -> peerdrive_transit::Result<TransitResponseCode> {
    let e = match result {
        Ok(code) => return Ok(code),
        Err(e) => e,
    };
    match e.kind() {
        ErrorKind::Security => {
            tracing::warn!(%sender, error = %e, "transfer refused");
            Ok(TransitResponseCode::AccessDenied)
        }
        ErrorKind::Client => {
            tracing::info!(%sender, error = %e, code = ?e.client_code(), "transfer rejected");
            Ok(TransitResponseCode::Rejected)
        }
        ErrorKind::System => Err(e),
    }
}

impl<S: QueueStore + 'static, D: DriveManager + 'static> Tenant<S, D> {
    async fn connected_context(
        &self,
        sender: &IdentityId,
        token: &ClientAuthenticationToken,
    ) -> std::result::Result<RequestContext, peerdrive_transit::Result<TransitResponseCode>> {
        match self.peer_context(sender, token).await {
            Ok(ctx) => Ok(ctx),
            Err(TenantError::NotConnected(_)) => {
                tracing::warn!(%sender, "transfer from unknown sender");
                Err(Ok(TransitResponseCode::QuarantinedSenderNotConnected))
            }
            Err(e) => Err(respond(sender, Err(into_transit(e)))),
        }
    }
}

#[async_trait]
impl<S: QueueStore + 'static, D: DriveManager + 'static> PeerEndpoint for Tenant<S, D> {
    async fn receive_transfer(
        &self,
        sender: &IdentityId,
        token: &ClientAuthenticationToken,
        envelope: TransferEnvelope,
    ) -> peerdrive_transit::Result<TransitResponseCode> {
        let ctx = match self.connected_context(sender, token).await {
            Ok(ctx) => ctx,
            Err(answer) => return answer,
        };
        respond(sender, self.perimeter.accept_envelope(&ctx, envelope).await)
    }

    async fn receive_push_notification(
        &self,
        sender: &IdentityId,
        token: &ClientAuthenticationToken,
        notification: PushNotification,
    ) -> peerdrive_transit::Result<TransitResponseCode> {
        if let Err(answer) = self.connected_context(sender, token).await {
            return answer;
        }
        self.router
            .events()
            .publish(TransitEvent::PushNotificationRequested {
                sender: sender.clone(),
                global_transit_id: notification.global_transit_id,
                options: notification.options,
            })
            .await;
        Ok(TransitResponseCode::AcceptedDirectWrite)
    }
}
