//! Proptest generators for property-based testing.

use proptest::prelude::*;

use peerdrive_core::{DriveAlias, DriveType, IdentityId, TargetDrive};
use peerdrive_perms::{DrivePermission, PermissionKey, PermissionSet};

/// Any combination of drive permission flags, including none.
pub fn drive_permission() -> impl Strategy<Value = DrivePermission> {
    (0u32..16).prop_map(DrivePermission::from_bits)
}

pub fn permission_key() -> impl Strategy<Value = PermissionKey> {
    prop_oneof![
        Just(PermissionKey::READ_CONNECTIONS),
        Just(PermissionKey::READ_CIRCLE_MEMBERSHIP),
        Just(PermissionKey::MANAGE_FEED),
        Just(PermissionKey::SEND_DATA_TO_OTHER_IDENTITIES_ON_MY_BEHALF),
        Just(PermissionKey::SEND_PUSH_NOTIFICATIONS),
        Just(PermissionKey::USE_TRANSIT_READ),
        Just(PermissionKey::USE_TRANSIT_WRITE),
    ]
}

pub fn permission_set() -> impl Strategy<Value = PermissionSet> {
    prop::collection::vec(permission_key(), 0..5).prop_map(|keys| keys.into_iter().collect())
}

pub fn target_drive() -> impl Strategy<Value = TargetDrive> {
    (any::<[u8; 16]>(), any::<[u8; 16]>())
        .prop_map(|(alias, drive_type)| TargetDrive::new(DriveAlias::from(alias), DriveType::from(drive_type)))
}

/// A valid identity such as `abc.example`.
pub fn identity_id() -> impl Strategy<Value = IdentityId> {
    "[a-z][a-z0-9]{0,11}\\.(example|test)"
        .prop_filter_map("valid identity", |domain| IdentityId::new(&domain).ok())
}

/// Parameters for issuing one exchange grant: a permission per drive.
#[derive(Debug, Clone)]
pub struct GrantParams {
    pub drive_permissions: Vec<DrivePermission>,
    pub permission_set: PermissionSet,
    /// Whether the owner's master key is supplied.
    pub unlock: bool,
}

impl Arbitrary for GrantParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            prop::collection::vec(drive_permission(), 1..5),
            permission_set(),
            any::<bool>(),
        )
            .prop_map(|(drive_permissions, permission_set, unlock)| GrantParams {
                drive_permissions,
                permission_set,
                unlock,
            })
            .boxed()
    }
}

/// Several permission groups mentioning the same drive.
#[derive(Debug, Clone)]
pub struct UnionParams {
    pub group_permissions: Vec<DrivePermission>,
}

impl Arbitrary for UnionParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop::collection::vec(drive_permission(), 1..6)
            .prop_map(|group_permissions| UnionParams { group_permissions })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestFixture;
    use peerdrive_core::{DriveId, SymmetricKey};
    use peerdrive_perms::{
        ClientAuthenticationToken, DriveGrant, NamedGroup, PermissionContext, PermissionGroup,
        PermissionedDrive,
    };

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn test_storage_key_present_iff_read(params: GrantParams) {
            let (fixture, issued) = block_on(async {
                let fixture = TestFixture::new();
                let drives = fixture.drives(params.drive_permissions.len()).await.unwrap();
                let requests: Vec<_> = drives
                    .iter()
                    .zip(&params.drive_permissions)
                    .map(|(d, p)| (d.target_drive, *p))
                    .collect();
                let issued = fixture
                    .issue_with(&requests, params.permission_set.clone(), params.unlock)
                    .await
                    .unwrap();
                (fixture, issued)
            });

            prop_assert_eq!(issued.grant.drive_grants.len(), params.drive_permissions.len());
            for grant in &issued.grant.drive_grants {
                let expected = params.unlock && grant.permission().contains(DrivePermission::READ);
                prop_assert_eq!(grant.key_store_key_encrypted_storage_key.is_some(), expected);
            }

            let ctx = block_on(fixture.context(&issued)).unwrap();
            for grant in &issued.grant.drive_grants {
                let expected = params.unlock && grant.permission().contains(DrivePermission::READ);
                prop_assert_eq!(ctx.try_get_drive_storage_key(&grant.drive_id).is_some(), expected);
            }
        }

        #[test]
        fn test_redacted_grant_exposes_no_keys(params: GrantParams) {
            let issued = block_on(async {
                let fixture = TestFixture::new();
                let drives = fixture.drives(params.drive_permissions.len()).await.unwrap();
                let requests: Vec<_> = drives
                    .iter()
                    .zip(&params.drive_permissions)
                    .map(|(d, p)| (d.target_drive, *p))
                    .collect();
                fixture.issue(&requests, params.unlock).await.unwrap()
            });

            let json = serde_json::to_string(&issued.grant.redacted()).unwrap();
            prop_assert!(!json.contains("encrypted"));
            prop_assert!(!json.contains(&hex::encode(issued.token.shared_secret.as_bytes())));
            for grant in &issued.grant.drive_grants {
                if let Some(sealed) = &grant.key_store_key_encrypted_storage_key {
                    let sealed_json = serde_json::to_string(sealed).unwrap();
                    prop_assert!(!json.contains(&sealed_json));
                }
            }

            let registration = format!("{:?}", issued.registration);
            prop_assert!(!registration.contains(&hex::encode(issued.token.shared_secret.as_bytes())));
        }

        #[test]
        fn test_token_round_trip_and_tamper(tampered in any::<[u8; 32]>()) {
            let fixture = TestFixture::new();
            let issued = block_on(fixture.issue(&[], false)).unwrap();

            let ctx = block_on(fixture.context(&issued)).unwrap();
            prop_assert_eq!(ctx.shared_secret(), Some(&issued.token.shared_secret));

            let half = SymmetricKey::from_slice(&tampered).unwrap();
            prop_assume!(half != issued.token.access_token_half_key);
            let forged = ClientAuthenticationToken {
                access_token_half_key: half,
                ..issued.auth_token()
            };
            let mut grants = std::collections::BTreeMap::new();
            grants.insert("fixture".to_string(), issued.grant.clone());
            let result = block_on(fixture.grants.create_permission_context(
                &forged,
                &grants,
                &issued.registration,
                &Default::default(),
            ));
            prop_assert!(result.is_err());
        }

        #[test]
        fn test_union_of_groups(params: UnionParams) {
            let drive_id = DriveId::random();
            let groups = params
                .group_permissions
                .iter()
                .enumerate()
                .map(|(i, permission)| NamedGroup {
                    name: format!("group-{}", i),
                    group: PermissionGroup::new(
                        PermissionSet::new(),
                        vec![DriveGrant {
                            drive_id,
                            permissioned_drive: PermissionedDrive {
                                drive: TargetDrive::random(),
                                permission: *permission,
                            },
                            key_store_key_encrypted_storage_key: None,
                        }],
                        None,
                    ),
                })
                .collect();
            let ctx = PermissionContext::new(groups, None);

            let any_write = params.group_permissions.iter().any(|p| p.contains(DrivePermission::WRITE));
            let any_read = params.group_permissions.iter().any(|p| p.contains(DrivePermission::READ));
            prop_assert_eq!(ctx.assert_can_write_drive(&drive_id).is_ok(), any_write);
            prop_assert_eq!(ctx.assert_can_read_drive(&drive_id).is_ok(), any_read);
        }
    }

    proptest! {
        #[test]
        fn test_generated_identities_parse_back(id in identity_id()) {
            prop_assert_eq!(IdentityId::new(id.as_str()).unwrap(), id);
        }

        #[test]
        fn test_drive_permission_stays_in_range(permission in drive_permission()) {
            prop_assert!(DrivePermission::ALL.contains(permission));
        }
    }
}
