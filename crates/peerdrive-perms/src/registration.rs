//! Access registrations and client tokens.
//!
//! An [`AccessRegistration`] is the server's record of one client (a browser,
//! app, device, or peer identity). The matching [`ClientAccessToken`] is
//! handed to the client exactly once; the server keeps only its half of the
//! split access key.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use peerdrive_core::{
    now_millis, ClientErrorCode, EncryptedKey, RegistrationId, SymmetricKey, XorSplitKey,
};

use crate::error::{PermsError, Result};

/// Kind of client a token was issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ClientTokenType {
    Owner = 1,
    App = 2,
    Guest = 3,
    Transit = 4,
}

impl ClientTokenType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Owner),
            2 => Some(Self::App),
            3 => Some(Self::Guest),
            4 => Some(Self::Transit),
            _ => None,
        }
    }
}

/// Server-held record pairing a client with a grant.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessRegistration {
    pub id: RegistrationId,
    pub token_type: ClientTokenType,
    pub created: i64,
    /// Server half of the split access-key-store-key.
    pub client_access_key_encrypted_key_store_key: XorSplitKey,
    pub access_key_store_key_encrypted_shared_secret: EncryptedKey,
    /// The grant's key-store key, wrapped under the access-key-store-key.
    pub access_key_store_key_encrypted_exchange_grant_key_store_key: Option<EncryptedKey>,
    pub is_revoked: bool,
}

impl AccessRegistration {
    /// Revoke this client only; the grant and other clients are untouched.
    pub fn revoke(&mut self) {
        self.is_revoked = true;
    }

    pub fn assert_valid(&self) -> Result<()> {
        if self.is_revoked {
            return Err(PermsError::security(format!(
                "access registration {} has been revoked",
                self.id
            )));
        }
        Ok(())
    }

    /// Recombine the access-key-store-key from the client's half.
    ///
    /// Fails with a security error when the registration is revoked, the
    /// token belongs to another registration, or the half does not combine.
    pub fn decrypt_using_client_auth_token(
        &self,
        token: &ClientAuthenticationToken,
    ) -> Result<SymmetricKey> {
        self.assert_valid()?;
        if token.id != self.id {
            return Err(PermsError::security("token does not match access registration"));
        }
        self.client_access_key_encrypted_key_store_key
            .combine(&token.access_token_half_key)
            .map_err(|_| PermsError::security("invalid client token half"))
    }

    pub fn redacted(&self) -> RedactedAccessRegistration {
        RedactedAccessRegistration {
            id: self.id,
            token_type: self.token_type,
            created: self.created,
            is_revoked: self.is_revoked,
        }
    }
}

impl fmt::Debug for AccessRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessRegistration")
            .field("id", &self.id)
            .field("token_type", &self.token_type)
            .field("is_revoked", &self.is_revoked)
            .finish_non_exhaustive()
    }
}

/// Key-free view of an [`AccessRegistration`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedAccessRegistration {
    pub id: RegistrationId,
    pub token_type: ClientTokenType,
    pub created: i64,
    pub is_revoked: bool,
}

/// Everything a client receives at registration time. Never stored
/// server-side.
#[derive(Debug)]
pub struct ClientAccessToken {
    pub id: RegistrationId,
    pub access_token_half_key: SymmetricKey,
    pub shared_secret: SymmetricKey,
    pub token_type: ClientTokenType,
}

impl ClientAccessToken {
    /// The part of the token presented on every request.
    pub fn to_authentication_token(&self) -> ClientAuthenticationToken {
        ClientAuthenticationToken {
            id: self.id,
            access_token_half_key: self.access_token_half_key.duplicate(),
            token_type: self.token_type,
        }
    }
}

/// The credential a client presents on each request.
#[derive(Debug)]
pub struct ClientAuthenticationToken {
    pub id: RegistrationId,
    pub access_token_half_key: SymmetricKey,
    pub token_type: ClientTokenType,
}

impl ClientAuthenticationToken {
    /// Compact `id~half~type` form, e.g. for a cookie or header.
    pub fn to_portable(&self) -> Zeroizing<String> {
        let half = Zeroizing::new(hex::encode(self.access_token_half_key.as_bytes()));
        Zeroizing::new(format!(
            "{}~{}~{}",
            self.id.to_hex(),
            half.as_str(),
            self.token_type as u8
        ))
    }

    pub fn from_portable(s: &str) -> Result<Self> {
        let invalid = || PermsError::client(ClientErrorCode::InvalidToken, "malformed client token");

        let mut parts = s.split('~');
        let (Some(id), Some(half), Some(kind), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let id = RegistrationId::from_hex(id).map_err(|_| invalid())?;
        let half_bytes = Zeroizing::new(hex::decode(half).map_err(|_| invalid())?);
        let access_token_half_key = SymmetricKey::from_slice(&half_bytes).map_err(|_| invalid())?;
        let token_type = kind
            .parse::<u8>()
            .ok()
            .and_then(ClientTokenType::from_u8)
            .ok_or_else(invalid)?;

        Ok(Self {
            id,
            access_token_half_key,
            token_type,
        })
    }

    pub fn duplicate(&self) -> Self {
        Self {
            id: self.id,
            access_token_half_key: self.access_token_half_key.duplicate(),
            token_type: self.token_type,
        }
    }
}

/// Build a registration and its client token around an existing
/// access-key-store-key.
pub(crate) fn new_registration(
    token_type: ClientTokenType,
    access_key_store_key: &SymmetricKey,
    shared_secret: SymmetricKey,
    grant_key_store_key: Option<&SymmetricKey>,
) -> Result<(AccessRegistration, ClientAccessToken)> {
    let (server_half, client_half) = XorSplitKey::split(access_key_store_key);

    let registration = AccessRegistration {
        id: RegistrationId::random(),
        token_type,
        created: now_millis(),
        client_access_key_encrypted_key_store_key: server_half,
        access_key_store_key_encrypted_shared_secret: EncryptedKey::wrap(
            access_key_store_key,
            &shared_secret,
        )?,
        access_key_store_key_encrypted_exchange_grant_key_store_key: grant_key_store_key
            .map(|k| EncryptedKey::wrap(access_key_store_key, k))
            .transpose()?,
        is_revoked: false,
    };

    let token = ClientAccessToken {
        id: registration.id,
        access_token_half_key: client_half,
        shared_secret,
        token_type,
    };

    Ok((registration, token))
}
