//! Shared setup for transit unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use peerdrive_core::{IdentityId, SymmetricKey, TargetDrive};
use peerdrive_perms::{
    AuthContext, ClientTokenType, CreateDriveRequest, DriveGrantRequest, DrivePermission,
    ExchangeGrantService, MemoryDriveManager, PermissionContextOptions, PermissionSet,
    RequestContext, StorageDrive,
};
use peerdrive_store::MemoryQueueStore;

use crate::events::MemoryEventBus;
use crate::perimeter::PeerPerimeter;
use crate::router::{TransferRouter, TransitConfig};
use crate::storage::MemoryDriveStorage;

pub(crate) type TestRouter = TransferRouter<MemoryDriveManager, MemoryQueueStore>;

/// One tenant with in-memory collaborators.
pub(crate) struct Harness {
    pub tenant: IdentityId,
    pub master_key: SymmetricKey,
    pub drives: Arc<MemoryDriveManager>,
    pub storage: Arc<MemoryDriveStorage>,
    pub events: Arc<MemoryEventBus>,
    pub queues: Arc<MemoryQueueStore>,
    pub grants: ExchangeGrantService<MemoryDriveManager>,
    pub router: Arc<TestRouter>,
    pub perimeter: PeerPerimeter<MemoryDriveManager, MemoryQueueStore>,
}

impl Harness {
    pub async fn new() -> Self {
        let drives = Arc::new(MemoryDriveManager::new());
        let storage = Arc::new(MemoryDriveStorage::new());
        let events = Arc::new(MemoryEventBus::new());
        let queues = Arc::new(MemoryQueueStore::new());
        let tenant = IdentityId::new("frodo.example").unwrap();

        let router = Arc::new(TransferRouter::new(
            tenant.clone(),
            TransitConfig::default(),
            Arc::clone(&drives),
            storage.clone(),
            events.clone(),
            Arc::clone(&queues),
        ));

        Self {
            tenant,
            master_key: SymmetricKey::generate(),
            grants: ExchangeGrantService::new(Arc::clone(&drives)),
            perimeter: PeerPerimeter::new(Arc::clone(&router)),
            drives,
            storage,
            events,
            queues,
            router,
        }
    }

    /// Rebuild the router and perimeter with `config`. Existing drives,
    /// files and queues are kept.
    pub fn with_config(mut self, config: TransitConfig) -> Self {
        self.router = Arc::new(TransferRouter::new(
            self.tenant.clone(),
            config,
            Arc::clone(&self.drives),
            self.storage.clone(),
            self.events.clone(),
            Arc::clone(&self.queues),
        ));
        self.perimeter = PeerPerimeter::new(Arc::clone(&self.router));
        self
    }

    pub fn with_feed_drive(self, feed: TargetDrive) -> Self {
        let config = TransitConfig {
            feed_drive: Some(feed),
            ..TransitConfig::default()
        };
        self.with_config(config)
    }

    pub async fn drive(&self, request: CreateDriveRequest) -> StorageDrive {
        self.drives.create_drive(&self.master_key, request).await.unwrap()
    }

    /// Context of a connected identity holding `permission` on `drive`.
    ///
    /// With `unlock`, the grant carries the drive's storage key (Read grants
    /// only). Returns the connection's shared secret alongside.
    pub async fn peer_context(
        &self,
        sender: &str,
        drive: &StorageDrive,
        permission: DrivePermission,
        unlock: bool,
    ) -> (RequestContext, SymmetricKey) {
        let key_store_key = SymmetricKey::generate();
        let grant = self
            .grants
            .create_exchange_grant(
                &key_store_key,
                PermissionSet::new(),
                &[DriveGrantRequest::new(drive.target_drive, permission)],
                unlock.then_some(&self.master_key),
                None,
            )
            .await
            .unwrap();
        let (registration, token) = self
            .grants
            .create_client_access_token(Some(&key_store_key), ClientTokenType::Transit, None)
            .unwrap();

        let mut grants = BTreeMap::new();
        grants.insert(format!("connection:{}", sender), grant);
        let permissions = self
            .grants
            .create_permission_context(
                &token.to_authentication_token(),
                &grants,
                &registration,
                &PermissionContextOptions::default(),
            )
            .await
            .unwrap();

        let ctx = RequestContext::new(
            self.tenant.clone(),
            Some(IdentityId::new(sender).unwrap()),
            AuthContext::PeerTransit,
            permissions,
        );
        (ctx, token.shared_secret)
    }

    /// The tenant owner's own context over every current drive.
    pub async fn owner_context(&self) -> RequestContext {
        let permissions = self.grants.create_owner_context(&self.master_key).await.unwrap();
        RequestContext::new(self.tenant.clone(), None, AuthContext::Owner, permissions)
    }
}
