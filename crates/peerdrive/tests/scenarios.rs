//! End-to-end transit between tenants on an in-process network.
//!
//! Each test wires up two or more tenants, connects them, and sends files
//! through the outbox → perimeter → (direct write | inbox) path.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use peerdrive::core::{FileSystemType, GlobalTransitId, IdentityId, SymmetricKey};
use peerdrive::perms::{
    CreateDriveRequest, DriveGrantRequest, DrivePermission, MemoryDriveManager, PermissionSet,
    StorageDrive,
};
use peerdrive::store::{MemoryQueueStore, OutboxItem, QueueStore, RetryPolicy, SqliteQueueStore};
use peerdrive::transit::{
    EnvelopePart, FileMetadata, KeyHeader, MemoryDriveStorage, MemoryEventBus,
    MemoryPeerNetwork, PartKind, PayloadDescriptor, TransferEnvelope, TransferInstructionSet,
    TransitEvent,
};
use peerdrive::{
    OutgoingFile, PeerEndpoint, Tenant, TenantConfig, TransferStatus, TransitResponseCode,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// One tenant plus handles on its in-memory collaborators.
struct Node<S: QueueStore + 'static> {
    tenant: Arc<Tenant<S, MemoryDriveManager>>,
    events: Arc<MemoryEventBus>,
    drive: StorageDrive,
}

impl<S: QueueStore + 'static> Node<S> {
    fn id(&self) -> IdentityId {
        self.tenant.identity().clone()
    }
}

async fn node_with<S: QueueStore + 'static>(
    name: &str,
    config: TenantConfig,
    queues: S,
) -> anyhow::Result<Node<S>> {
    let events = Arc::new(MemoryEventBus::new());
    let tenant = Arc::new(Tenant::new(
        IdentityId::new(name)?,
        SymmetricKey::generate(),
        config,
        Arc::new(MemoryDriveManager::new()),
        Arc::new(MemoryDriveStorage::new()),
        events.clone(),
        Arc::new(queues),
    ));
    let drive = tenant.create_drive(CreateDriveRequest::new("chat")).await?;
    Ok(Node {
        tenant,
        events,
        drive,
    })
}

async fn node(name: &str) -> anyhow::Result<Node<MemoryQueueStore>> {
    node_with(name, fast_retry_config(), MemoryQueueStore::new()).await
}

/// Retries due immediately, so a test can redeliver without waiting.
fn fast_retry_config() -> TenantConfig {
    TenantConfig {
        outbox_retry: RetryPolicy {
            base_delay_ms: 0,
            ..RetryPolicy::default()
        },
        ..TenantConfig::default()
    }
}

/// `recipient` lets `sender` write to its chat drive with `permission`; the
/// sender keeps the token.
async fn connect<A: QueueStore + 'static, B: QueueStore + 'static>(
    sender: &Node<A>,
    recipient: &Node<B>,
    permission: DrivePermission,
) -> anyhow::Result<()> {
    let token = recipient
        .tenant
        .connect(
            sender.id(),
            &[DriveGrantRequest::new(recipient.drive.target_drive, permission)],
            PermissionSet::new(),
        )
        .await?;
    sender.tenant.accept_connection(recipient.id(), &token).await?;
    Ok(())
}

async fn online<S: QueueStore + 'static>(network: &MemoryPeerNetwork, node: &Node<S>) {
    network.register(node.id(), node.tenant.clone()).await;
}

fn file<S: QueueStore + 'static, T: QueueStore + 'static>(
    sender: &Node<S>,
    recipient: &Node<T>,
    header: Option<KeyHeader>,
) -> OutgoingFile {
    OutgoingFile {
        source: sender.drive.target_drive,
        destination: recipient.drive.target_drive,
        file_system_type: FileSystemType::Standard,
        metadata: FileMetadata {
            is_encrypted: header.is_some(),
            payloads: vec![PayloadDescriptor::new("main", "text/plain")],
            ..Default::default()
        },
        parts: vec![EnvelopePart {
            kind: PartKind::payload("main"),
            data: Bytes::from_static(b"there and back again"),
        }],
        key_header: header,
        app_notification: None,
    }
}

async fn files_on<S: QueueStore + 'static>(
    node: &Node<S>,
) -> anyhow::Result<Vec<peerdrive::transit::StoredFile>> {
    Ok(node.tenant.storage().list_files(&node.drive.id).await?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Direct write vs. inbox
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unencrypted_file_is_written_directly() -> anyhow::Result<()> {
    init_tracing();
    let network = MemoryPeerNetwork::new();
    let frodo = node("frodo.example").await?;
    let sam = node("sam.example").await?;
    online(&network, &sam).await;
    connect(&frodo, &sam, DrivePermission::WRITE).await?;

    let report = frodo
        .tenant
        .send_file(file(&frodo, &sam, None), &[sam.id()], OutboxItem::PRIORITY_DEFAULT)
        .await?;
    assert_eq!(report.recipients[&sam.id()], TransferStatus::Enqueued);

    let deliveries = frodo
        .tenant
        .process_outbox(network.clone(), frodo.tenant.connections())
        .await?;
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, TransferStatus::DeliveredToTargetDrive);
    assert_eq!(deliveries[0].response, Some(TransitResponseCode::AcceptedDirectWrite));

    let stored = files_on(&sam).await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].sender, Some(frodo.id()));
    assert_eq!(stored[0].global_transit_id, Some(report.global_transit_id));
    assert_eq!(
        stored[0].payloads.get("payload.main").map(|b| b.as_ref()),
        Some(&b"there and back again"[..])
    );
    Ok(())
}

#[tokio::test]
async fn test_encrypted_file_to_write_only_grant_waits_in_inbox() -> anyhow::Result<()> {
    init_tracing();
    let network = MemoryPeerNetwork::new();
    let frodo = node("frodo.example").await?;
    let sam = node("sam.example").await?;
    online(&network, &sam).await;
    connect(&frodo, &sam, DrivePermission::WRITE).await?;

    let header = KeyHeader::generate();
    let aes_key = header.aes_key.duplicate();
    let report = frodo
        .tenant
        .send_file(
            file(&frodo, &sam, Some(header)),
            &[sam.id()],
            OutboxItem::PRIORITY_DEFAULT,
        )
        .await?;
    assert_eq!(report.recipients[&sam.id()], TransferStatus::TransferKeyCreated);

    let deliveries = frodo
        .tenant
        .process_outbox(network.clone(), frodo.tenant.connections())
        .await?;
    assert_eq!(deliveries[0].status, TransferStatus::DeliveredToInbox);
    assert!(files_on(&sam).await?.is_empty());
    assert!(sam
        .events
        .published()
        .await
        .iter()
        .any(|e| matches!(e, TransitEvent::InboxItemReceived { .. })));

    let status = sam
        .tenant
        .process_inbox(&sam.drive.target_drive, None)
        .await?;
    assert_eq!(status.total, 0);

    let stored = files_on(&sam).await?;
    assert_eq!(stored.len(), 1);
    let sealed = stored[0].key_header.as_ref().expect("stored key header");

    // At rest the header is sealed under the drive's storage key.
    let owner = sam.tenant.owner_context().await?;
    let storage_key = owner
        .permissions
        .try_get_drive_storage_key(&sam.drive.id)
        .expect("owner unlocks every drive");
    let opened = KeyHeader::open(sealed, &storage_key)?;
    assert_eq!(opened.aes_key, aes_key);
    Ok(())
}

#[tokio::test]
async fn test_encrypted_file_to_read_grant_is_written_directly() -> anyhow::Result<()> {
    init_tracing();
    let network = MemoryPeerNetwork::new();
    let frodo = node("frodo.example").await?;
    let sam = node("sam.example").await?;
    online(&network, &sam).await;
    connect(&frodo, &sam, DrivePermission::READ_WRITE).await?;

    frodo
        .tenant
        .send_file(
            file(&frodo, &sam, Some(KeyHeader::generate())),
            &[sam.id()],
            OutboxItem::PRIORITY_DEFAULT,
        )
        .await?;
    let deliveries = frodo
        .tenant
        .process_outbox(network.clone(), frodo.tenant.connections())
        .await?;

    assert_eq!(deliveries[0].status, TransferStatus::DeliveredToTargetDrive);
    assert_eq!(files_on(&sam).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_encrypted_comment_to_locked_drive_is_denied() -> anyhow::Result<()> {
    init_tracing();
    let network = MemoryPeerNetwork::new();
    let frodo = node("frodo.example").await?;
    let sam = node("sam.example").await?;
    online(&network, &sam).await;
    connect(&frodo, &sam, DrivePermission::COMMENT).await?;

    let mut comment = file(&frodo, &sam, Some(KeyHeader::generate()));
    comment.file_system_type = FileSystemType::Comment;
    comment.metadata.referenced_file = Some(GlobalTransitId::random());
    frodo
        .tenant
        .send_file(comment, &[sam.id()], OutboxItem::PRIORITY_DEFAULT)
        .await?;

    let deliveries = frodo
        .tenant
        .process_outbox(network.clone(), frodo.tenant.connections())
        .await?;
    assert_eq!(deliveries[0].status, TransferStatus::RecipientReturnedAccessDenied);
    assert!(files_on(&sam).await?.is_empty());
    assert_eq!(sam.tenant.inbox_status(&sam.drive.target_drive).await?.total, 0);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Connections
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_revoked_connection_is_denied() -> anyhow::Result<()> {
    init_tracing();
    let network = MemoryPeerNetwork::new();
    let frodo = node("frodo.example").await?;
    let sam = node("sam.example").await?;
    online(&network, &sam).await;
    connect(&frodo, &sam, DrivePermission::WRITE).await?;
    sam.tenant.revoke_connection(&frodo.id()).await?;

    frodo
        .tenant
        .send_file(file(&frodo, &sam, None), &[sam.id()], OutboxItem::PRIORITY_DEFAULT)
        .await?;
    let deliveries = frodo
        .tenant
        .process_outbox(network.clone(), frodo.tenant.connections())
        .await?;

    assert_eq!(deliveries[0].status, TransferStatus::RecipientReturnedAccessDenied);
    assert!(files_on(&sam).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_transfer_from_unknown_sender_is_quarantined() -> anyhow::Result<()> {
    init_tracing();
    let frodo = node("frodo.example").await?;
    let sam = node("sam.example").await?;
    let token = sam
        .tenant
        .connect(frodo.id(), &[], PermissionSet::new())
        .await?;

    // merry presents frodo's token
    let merry = IdentityId::new("merry.example")?;
    let envelope = TransferEnvelope::new(
        TransferInstructionSet::save_file(sam.drive.target_drive, FileSystemType::Standard),
        FileMetadata {
            global_transit_id: Some(GlobalTransitId::random()),
            ..Default::default()
        },
    );
    let code = sam
        .tenant
        .receive_transfer(&merry, &token.to_authentication_token(), envelope)
        .await?;
    assert_eq!(code, TransitResponseCode::QuarantinedSenderNotConnected);
    Ok(())
}

#[tokio::test]
async fn test_transfer_outside_grant_is_denied() -> anyhow::Result<()> {
    init_tracing();
    let network = MemoryPeerNetwork::new();
    let frodo = node("frodo.example").await?;
    let sam = node("sam.example").await?;
    online(&network, &sam).await;
    // Read only: no write permission on the chat drive.
    connect(&frodo, &sam, DrivePermission::READ).await?;

    frodo
        .tenant
        .send_file(file(&frodo, &sam, None), &[sam.id()], OutboxItem::PRIORITY_DEFAULT)
        .await?;
    let deliveries = frodo
        .tenant
        .process_outbox(network.clone(), frodo.tenant.connections())
        .await?;
    assert_eq!(deliveries[0].status, TransferStatus::RecipientReturnedAccessDenied);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbox fan-out and retry
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fan_out_outcomes_are_independent() -> anyhow::Result<()> {
    init_tracing();
    let network = MemoryPeerNetwork::new();
    let frodo = node("frodo.example").await?;
    let sam = node("sam.example").await?;
    let merry = node("merry.example").await?;
    let pippin = IdentityId::new("pippin.example")?;

    online(&network, &sam).await;
    connect(&frodo, &sam, DrivePermission::WRITE).await?;
    // merry is connected but offline
    connect(&frodo, &merry, DrivePermission::WRITE).await?;

    let report = frodo
        .tenant
        .send_file(
            file(&frodo, &sam, None),
            &[sam.id(), merry.id(), pippin.clone()],
            OutboxItem::PRIORITY_DEFAULT,
        )
        .await?;
    assert_eq!(report.recipients[&pippin], TransferStatus::RecipientNotConnected);

    let deliveries = frodo
        .tenant
        .process_outbox(network.clone(), frodo.tenant.connections())
        .await?;
    assert_eq!(deliveries.len(), 2);
    for delivery in &deliveries {
        let expected = if delivery.recipient == sam.id() {
            TransferStatus::DeliveredToTargetDrive
        } else {
            TransferStatus::PendingRetry
        };
        assert_eq!(delivery.status, expected, "recipient {}", delivery.recipient);
    }
    assert_eq!(files_on(&sam).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_offline_recipient_gets_file_after_coming_online() -> anyhow::Result<()> {
    init_tracing();
    let network = MemoryPeerNetwork::new();
    let frodo = node("frodo.example").await?;
    let sam = node("sam.example").await?;
    connect(&frodo, &sam, DrivePermission::WRITE).await?;

    frodo
        .tenant
        .send_file(file(&frodo, &sam, None), &[sam.id()], OutboxItem::PRIORITY_DEFAULT)
        .await?;

    let first = frodo
        .tenant
        .process_outbox(network.clone(), frodo.tenant.connections())
        .await?;
    assert_eq!(first[0].status, TransferStatus::PendingRetry);

    online(&network, &sam).await;
    let second = frodo
        .tenant
        .process_outbox(network.clone(), frodo.tenant.connections())
        .await?;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].status, TransferStatus::DeliveredToTargetDrive);
    assert_eq!(files_on(&sam).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_retry_limit_dead_letters_delivery() -> anyhow::Result<()> {
    init_tracing();
    let network = MemoryPeerNetwork::new();
    let config = TenantConfig {
        outbox_retry: RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 0,
            max_delay_ms: 0,
        },
        ..TenantConfig::default()
    };
    let frodo = node_with("frodo.example", config, MemoryQueueStore::new()).await?;
    let sam = node("sam.example").await?;
    connect(&frodo, &sam, DrivePermission::WRITE).await?;

    frodo
        .tenant
        .send_file(file(&frodo, &sam, None), &[sam.id()], OutboxItem::PRIORITY_DEFAULT)
        .await?;

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let reports = frodo
            .tenant
            .process_outbox(network.clone(), frodo.tenant.connections())
            .await?;
        statuses.extend(reports.into_iter().map(|r| r.status));
    }
    assert_eq!(
        statuses,
        vec![TransferStatus::PendingRetry, TransferStatus::RetryLimitReached]
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Idempotence and persistence
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_redelivered_file_is_applied_once() -> anyhow::Result<()> {
    init_tracing();
    let network = MemoryPeerNetwork::new();
    let frodo = node("frodo.example").await?;
    let sam = node("sam.example").await?;
    online(&network, &sam).await;
    connect(&frodo, &sam, DrivePermission::WRITE).await?;

    let gtid = GlobalTransitId::random();
    for _ in 0..2 {
        let mut outgoing = file(&frodo, &sam, Some(KeyHeader::generate()));
        outgoing.metadata.global_transit_id = Some(gtid);
        frodo
            .tenant
            .send_file(outgoing, &[sam.id()], OutboxItem::PRIORITY_DEFAULT)
            .await?;
        frodo
            .tenant
            .process_outbox(network.clone(), frodo.tenant.connections())
            .await?;
    }

    sam.tenant.process_inbox(&sam.drive.target_drive, None).await?;
    sam.tenant.process_inbox(&sam.drive.target_drive, None).await?;

    let stored = files_on(&sam).await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].global_transit_id, Some(gtid));
    Ok(())
}

#[tokio::test]
async fn test_sqlite_backed_inbox() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let network = MemoryPeerNetwork::new();
    let frodo = node("frodo.example").await?;
    let sam = node_with(
        "sam.example",
        TenantConfig::default(),
        SqliteQueueStore::open(dir.path().join("sam.db"))?,
    )
    .await?;
    online(&network, &sam).await;
    connect(&frodo, &sam, DrivePermission::WRITE).await?;

    frodo
        .tenant
        .send_file(
            file(&frodo, &sam, Some(KeyHeader::generate())),
            &[sam.id()],
            OutboxItem::PRIORITY_DEFAULT,
        )
        .await?;
    let deliveries = frodo
        .tenant
        .process_outbox(network.clone(), frodo.tenant.connections())
        .await?;
    assert_eq!(deliveries[0].status, TransferStatus::DeliveredToInbox);

    let status = sam.tenant.process_inbox(&sam.drive.target_drive, Some(10)).await?;
    assert_eq!(status.total, 0);
    assert_eq!(files_on(&sam).await?.len(), 1);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Housekeeping
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_idle_sessions_are_swept() -> anyhow::Result<()> {
    init_tracing();
    let frodo = node("frodo.example").await?;
    let sam = node_with(
        "sam.example",
        TenantConfig {
            session_ttl_ms: 0,
            ..TenantConfig::default()
        },
        MemoryQueueStore::new(),
    )
    .await?;
    let token = sam
        .tenant
        .connect(
            frodo.id(),
            &[DriveGrantRequest::new(sam.drive.target_drive, DrivePermission::WRITE)],
            PermissionSet::new(),
        )
        .await?;

    let ctx = sam
        .tenant
        .peer_context(&frodo.id(), &token.to_authentication_token())
        .await?;
    sam.tenant
        .perimeter()
        .initialize(
            &ctx,
            TransferInstructionSet::save_file(sam.drive.target_drive, FileSystemType::Standard),
        )
        .await?;

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sam.tenant.sweep_sessions().await, 1);
    assert_eq!(sam.tenant.sweep_sessions().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_recover_with_nothing_stale() -> anyhow::Result<()> {
    let frodo = node("frodo.example").await?;
    assert_eq!(frodo.tenant.recover_stale_items().await?, 0);
    assert_eq!(frodo.tenant.inbox_status(&frodo.drive.target_drive).await?.total, 0);
    Ok(())
}
