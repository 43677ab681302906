//! Exchange grant service: issuing grants and tokens, building contexts.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use peerdrive_core::{now_millis, ClientErrorCode, EncryptedKey, SymmetricKey};

use crate::context::{NamedGroup, PermissionContext};
use crate::drive::{DriveManager, StorageDrive};
use crate::error::{PermsError, Result};
use crate::grant::{DriveGrant, DriveGrantRequest, ExchangeGrant, PermissionedDrive};
use crate::group::PermissionGroup;
use crate::permission::{DrivePermission, PermissionSet};
use crate::registration::{
    new_registration, AccessRegistration, ClientAccessToken, ClientAuthenticationToken,
    ClientTokenType,
};

/// Group name used for anonymous-drive access.
pub const ANONYMOUS_DRIVES_GROUP: &str = "read_anonymous_drives";
/// Group name used for ad-hoc permission keys.
pub const ADDITIONAL_PERMISSIONS_GROUP: &str = "additional_permissions";
/// Group name used for the owner's context.
pub const OWNER_GROUP: &str = "owner";

/// Options for [`ExchangeGrantService::create_permission_context`].
#[derive(Debug, Clone, Default)]
pub struct PermissionContextOptions {
    pub additional_permission_keys: Option<PermissionSet>,
    pub include_anonymous_drives: bool,
}

/// Builds and evaluates grants against a [`DriveManager`].
pub struct ExchangeGrantService<D: DriveManager> {
    drive_manager: Arc<D>,
}

impl<D: DriveManager> Clone for ExchangeGrantService<D> {
    fn clone(&self) -> Self {
        Self {
            drive_manager: Arc::clone(&self.drive_manager),
        }
    }
}

impl<D: DriveManager> ExchangeGrantService<D> {
    pub fn new(drive_manager: Arc<D>) -> Self {
        Self { drive_manager }
    }

    pub fn drive_manager(&self) -> &Arc<D> {
        &self.drive_manager
    }

    /// Create an exchange grant for the requested drives.
    ///
    /// All-or-nothing: an unknown, duplicated, or owner-only drive fails the
    /// whole call. Storage keys are re-wrapped under `grant_key_store_key`
    /// only for Read grants, and only when `master_key` is supplied.
    pub async fn create_exchange_grant(
        &self,
        grant_key_store_key: &SymmetricKey,
        permission_set: PermissionSet,
        drive_grant_requests: &[DriveGrantRequest],
        master_key: Option<&SymmetricKey>,
        icr_key: Option<&SymmetricKey>,
    ) -> Result<ExchangeGrant> {
        let mut drives = Vec::with_capacity(drive_grant_requests.len());
        let mut seen = HashSet::new();
        for request in drive_grant_requests {
            let drive = self.resolve_drive(request).await?;
            if !seen.insert(drive.id) {
                return Err(PermsError::client(
                    ClientErrorCode::DuplicateDriveGrant,
                    format!("drive {} requested more than once", drive.target_drive),
                ));
            }
            if drive.owner_only {
                return Err(PermsError::security(format!(
                    "drive {} is owner-only and cannot be granted",
                    drive.target_drive
                )));
            }
            drives.push((drive, request.permissioned_drive.permission));
        }

        let drive_grants = drives
            .iter()
            .map(|(drive, permission)| {
                create_drive_grant(drive, *permission, grant_key_store_key, master_key)
            })
            .collect::<Result<Vec<_>>>()?;

        let now = now_millis();
        let grant = ExchangeGrant {
            created: now,
            modified: now,
            master_key_encrypted_key_store_key: master_key
                .map(|mk| EncryptedKey::wrap(mk, grant_key_store_key))
                .transpose()?,
            is_revoked: false,
            drive_grants,
            permission_set,
            key_store_key_encrypted_icr_key: icr_key
                .map(|icr| EncryptedKey::wrap(grant_key_store_key, icr))
                .transpose()?,
        };

        tracing::debug!(
            drives = grant.drive_grants.len(),
            with_keys = master_key.is_some(),
            "exchange grant created"
        );
        Ok(grant)
    }

    /// Create an access registration and the one-time client token.
    ///
    /// A fresh access-key-store-key is split between server and client. The
    /// shared secret (generated when not supplied) and the grant key-store
    /// key are wrapped under it.
    pub fn create_client_access_token(
        &self,
        grant_key_store_key: Option<&SymmetricKey>,
        token_type: ClientTokenType,
        shared_secret: Option<SymmetricKey>,
    ) -> Result<(AccessRegistration, ClientAccessToken)> {
        let access_key_store_key = SymmetricKey::generate();
        let shared_secret = shared_secret.unwrap_or_else(SymmetricKey::generate);
        new_registration(
            token_type,
            &access_key_store_key,
            shared_secret,
            grant_key_store_key,
        )
    }

    /// Rebuild the caller's permission context for one request.
    ///
    /// One group per non-revoked grant (named by its key in `grants`), plus
    /// optional groups for anonymous drives and additional permission keys.
    pub async fn create_permission_context(
        &self,
        auth_token: &ClientAuthenticationToken,
        grants: &BTreeMap<String, ExchangeGrant>,
        access_registration: &AccessRegistration,
        options: &PermissionContextOptions,
    ) -> Result<PermissionContext> {
        let access_key_store_key =
            access_registration.decrypt_using_client_auth_token(auth_token)?;

        let shared_secret = access_registration
            .access_key_store_key_encrypted_shared_secret
            .unwrap(&access_key_store_key)
            .map_err(|_| PermsError::security("cannot decrypt shared secret"))?;

        let grant_key_store_key = access_registration
            .access_key_store_key_encrypted_exchange_grant_key_store_key
            .as_ref()
            .map(|k| k.unwrap(&access_key_store_key))
            .transpose()
            .map_err(|_| PermsError::security("cannot decrypt grant key-store key"))?;

        let mut groups = Vec::with_capacity(grants.len() + 2);
        for (name, grant) in grants {
            if grant.is_revoked {
                tracing::debug!(grant = %name, "skipping revoked grant");
                continue;
            }
            groups.push(NamedGroup {
                name: name.clone(),
                group: PermissionGroup::new(
                    grant.permission_set.clone(),
                    grant.drive_grants.clone(),
                    grant_key_store_key.as_ref().map(SymmetricKey::duplicate),
                ),
            });
        }

        if options.include_anonymous_drives {
            groups.push(self.anonymous_drives_group().await?);
        }

        if let Some(keys) = &options.additional_permission_keys {
            groups.push(NamedGroup {
                name: ADDITIONAL_PERMISSIONS_GROUP.to_string(),
                group: PermissionGroup::new(keys.clone(), Vec::new(), None),
            });
        }

        Ok(PermissionContext::new(groups, Some(shared_secret)))
    }

    /// The owner's context: every drive at full permission, keyed through a
    /// throwaway key-store key.
    pub async fn create_owner_context(&self, master_key: &SymmetricKey) -> Result<PermissionContext> {
        let key_store_key = SymmetricKey::generate();
        let drive_grants = self
            .drive_manager
            .list_drives()
            .await?
            .iter()
            .map(|drive| create_drive_grant(drive, DrivePermission::ALL, &key_store_key, Some(master_key)))
            .collect::<Result<Vec<_>>>()?;

        let group = PermissionGroup::new(PermissionSet::new(), drive_grants, Some(key_store_key));
        Ok(PermissionContext::new(
            vec![NamedGroup {
                name: OWNER_GROUP.to_string(),
                group,
            }],
            None,
        ))
    }

    async fn anonymous_drives_group(&self) -> Result<NamedGroup> {
        let drive_grants = self
            .drive_manager
            .get_anonymous_drives()
            .await?
            .into_iter()
            .map(|drive| DriveGrant {
                drive_id: drive.id,
                permissioned_drive: PermissionedDrive {
                    drive: drive.target_drive,
                    permission: DrivePermission::READ,
                },
                key_store_key_encrypted_storage_key: None,
            })
            .collect();

        Ok(NamedGroup {
            name: ANONYMOUS_DRIVES_GROUP.to_string(),
            group: PermissionGroup::new(PermissionSet::new(), drive_grants, None),
        })
    }

    async fn resolve_drive(&self, request: &DriveGrantRequest) -> Result<StorageDrive> {
        let target = request.permissioned_drive.drive;
        self.drive_manager
            .get_drive_by_target(&target)
            .await?
            .ok_or_else(|| {
                PermsError::client(
                    ClientErrorCode::InvalidDrive,
                    format!("invalid drive {}", target),
                )
            })
    }
}

fn create_drive_grant(
    drive: &StorageDrive,
    permission: DrivePermission,
    grant_key_store_key: &SymmetricKey,
    master_key: Option<&SymmetricKey>,
) -> Result<DriveGrant> {
    let key_store_key_encrypted_storage_key = match master_key {
        Some(mk) if permission.contains(DrivePermission::READ) => {
            let storage_key = drive.master_key_encrypted_storage_key.unwrap(mk)?;
            Some(EncryptedKey::wrap(grant_key_store_key, &storage_key)?)
        }
        _ => None,
    };

    Ok(DriveGrant {
        drive_id: drive.id,
        permissioned_drive: PermissionedDrive {
            drive: drive.target_drive,
            permission,
        },
        key_store_key_encrypted_storage_key,
    })
}
