//! Test fixtures and helpers.
//!
//! Common setup for grant and transit tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use peerdrive::{Tenant, TenantConfig};
use peerdrive_core::{CoreError, IdentityId, SymmetricKey, TargetDrive};
use peerdrive_perms::{
    AccessRegistration, ClientAccessToken, ClientAuthenticationToken, ClientTokenType,
    CreateDriveRequest, DriveGrantRequest, DrivePermission, ExchangeGrant, ExchangeGrantService,
    MemoryDriveManager, PermissionContext, PermissionContextOptions, PermissionSet, Result,
    StorageDrive,
};
use peerdrive_store::MemoryQueueStore;
use peerdrive_transit::{MemoryDriveStorage, MemoryEventBus};

/// An exchange grant with the registration and token issued alongside it.
pub struct IssuedGrant {
    pub grant: ExchangeGrant,
    pub registration: AccessRegistration,
    pub token: ClientAccessToken,
}

impl IssuedGrant {
    pub fn auth_token(&self) -> ClientAuthenticationToken {
        self.token.to_authentication_token()
    }
}

/// A drive manager with a master key and a grant service over it.
pub struct TestFixture {
    pub master_key: SymmetricKey,
    pub drives: Arc<MemoryDriveManager>,
    pub grants: ExchangeGrantService<MemoryDriveManager>,
}

impl TestFixture {
    pub fn new() -> Self {
        let drives = Arc::new(MemoryDriveManager::new());
        Self {
            master_key: SymmetricKey::generate(),
            grants: ExchangeGrantService::new(Arc::clone(&drives)),
            drives,
        }
    }

    pub async fn drive(&self, name: &str) -> Result<StorageDrive> {
        self.drives
            .create_drive(&self.master_key, CreateDriveRequest::new(name))
            .await
    }

    /// `count` drives named `drive-0`, `drive-1`, ...
    pub async fn drives(&self, count: usize) -> Result<Vec<StorageDrive>> {
        let mut drives = Vec::with_capacity(count);
        for i in 0..count {
            drives.push(self.drive(&format!("drive-{}", i)).await?);
        }
        Ok(drives)
    }

    /// Issue a grant over `drives` with a transit token.
    ///
    /// With `unlock`, the master key is supplied so Read grants carry their
    /// storage keys.
    pub async fn issue(
        &self,
        drives: &[(TargetDrive, DrivePermission)],
        unlock: bool,
    ) -> Result<IssuedGrant> {
        self.issue_with(drives, PermissionSet::new(), unlock).await
    }

    pub async fn issue_with(
        &self,
        drives: &[(TargetDrive, DrivePermission)],
        permissions: PermissionSet,
        unlock: bool,
    ) -> Result<IssuedGrant> {
        let requests: Vec<DriveGrantRequest> = drives
            .iter()
            .map(|(target, permission)| DriveGrantRequest::new(*target, *permission))
            .collect();
        let key_store_key = SymmetricKey::generate();

        let grant = self
            .grants
            .create_exchange_grant(
                &key_store_key,
                permissions,
                &requests,
                unlock.then_some(&self.master_key),
                None,
            )
            .await?;
        let (registration, token) = self.grants.create_client_access_token(
            Some(&key_store_key),
            ClientTokenType::Transit,
            None,
        )?;

        Ok(IssuedGrant {
            grant,
            registration,
            token,
        })
    }

    /// Permission context for an issued grant, presenting its own token.
    pub async fn context(&self, issued: &IssuedGrant) -> Result<PermissionContext> {
        let mut grants = BTreeMap::new();
        grants.insert("fixture".to_string(), issued.grant.clone());
        self.grants
            .create_permission_context(
                &issued.auth_token(),
                &grants,
                &issued.registration,
                &PermissionContextOptions::default(),
            )
            .await
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A tenant with every collaborator in memory.
pub fn memory_tenant(
    name: &str,
) -> std::result::Result<Tenant<MemoryQueueStore, MemoryDriveManager>, CoreError> {
    Ok(Tenant::new(
        IdentityId::new(name)?,
        SymmetricKey::generate(),
        TenantConfig::default(),
        Arc::new(MemoryDriveManager::new()),
        Arc::new(MemoryDriveStorage::new()),
        Arc::new(MemoryEventBus::new()),
        Arc::new(MemoryQueueStore::new()),
    ))
}

/// Distinct identities for multi-party tests: `peer0.example`, `peer1.example`, ...
pub fn identities(count: usize) -> Vec<IdentityId> {
    (0..count)
        .filter_map(|i| IdentityId::new(&format!("peer{}.example", i)).ok())
        .collect()
}
