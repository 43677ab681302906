//! Connections with other identities.
//!
//! A connection has two directions. When we *issue* a connection, the peer
//! gets a transit token and we keep the exchange grant and access
//! registration that back it. When we *accept* one, we keep the token the
//! peer issued to us so we can present it on delivery. Both sides also keep
//! the connection's shared secret, wrapped under the owner's master key; it
//! seals key headers in transit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use peerdrive_core::{EncryptedKey, IdentityId, SymmetricKey};
use peerdrive_perms::{
    AccessRegistration, ClientAccessToken, ClientAuthenticationToken, ExchangeGrant,
    RedactedExchangeGrant,
};
use peerdrive_transit::{ConnectionSecrets, RecipientTokens};

use crate::error::{Result, TenantError};

/// Grant name a connection's exchange grant is evaluated under.
pub fn connection_grant_name(peer: &IdentityId) -> String {
    format!("connection:{}", peer)
}

struct IssuedConnection {
    grant: ExchangeGrant,
    registration: AccessRegistration,
    master_key_encrypted_shared_secret: EncryptedKey,
}

struct AcceptedConnection {
    token: ClientAuthenticationToken,
    master_key_encrypted_shared_secret: EncryptedKey,
}

/// Per-tenant registry of issued and accepted connections.
pub struct ConnectionRegistry {
    master_key: Arc<SymmetricKey>,
    issued: RwLock<HashMap<IdentityId, IssuedConnection>>,
    accepted: RwLock<HashMap<IdentityId, AcceptedConnection>>,
}

impl ConnectionRegistry {
    pub fn new(master_key: Arc<SymmetricKey>) -> Self {
        Self {
            master_key,
            issued: RwLock::new(HashMap::new()),
            accepted: RwLock::new(HashMap::new()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Issued (peer → us)
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a connection issued to `peer`. Replaces any earlier one.
    pub async fn record_issued(
        &self,
        peer: IdentityId,
        grant: ExchangeGrant,
        registration: AccessRegistration,
        shared_secret: &SymmetricKey,
    ) -> Result<()> {
        let wrapped = EncryptedKey::wrap(&self.master_key, shared_secret)?;
        self.issued.write().await.insert(
            peer,
            IssuedConnection {
                grant,
                registration,
                master_key_encrypted_shared_secret: wrapped,
            },
        );
        Ok(())
    }

    /// The grant and registration backing `peer`'s access to us.
    pub async fn issued(&self, peer: &IdentityId) -> Option<(ExchangeGrant, AccessRegistration)> {
        self.issued
            .read()
            .await
            .get(peer)
            .map(|c| (c.grant.clone(), c.registration.clone()))
    }

    pub async fn issued_grant(&self, peer: &IdentityId) -> Option<RedactedExchangeGrant> {
        self.issued.read().await.get(peer).map(|c| c.grant.redacted())
    }

    /// Revoke the grant and registration issued to `peer`.
    ///
    /// Both are kept, marked revoked. Returns false if nothing was issued.
    pub async fn revoke(&self, peer: &IdentityId) -> bool {
        let mut issued = self.issued.write().await;
        match issued.get_mut(peer) {
            Some(connection) => {
                connection.grant.revoke();
                connection.registration.revoke();
                true
            }
            None => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accepted (us → peer)
    // ─────────────────────────────────────────────────────────────────────────

    /// Keep the token `peer` issued to us.
    pub async fn record_accepted(&self, peer: IdentityId, token: &ClientAccessToken) -> Result<()> {
        let wrapped = EncryptedKey::wrap(&self.master_key, &token.shared_secret)?;
        self.accepted.write().await.insert(
            peer,
            AcceptedConnection {
                token: token.to_authentication_token(),
                master_key_encrypted_shared_secret: wrapped,
            },
        );
        Ok(())
    }

    pub async fn is_accepted(&self, peer: &IdentityId) -> bool {
        self.accepted.read().await.contains_key(peer)
    }

    /// Shared secret of the connection `peer` issued to us; seals key
    /// headers sent to them.
    pub async fn outbound_secret(&self, peer: &IdentityId) -> Result<SymmetricKey> {
        let accepted = self.accepted.read().await;
        let connection = accepted
            .get(peer)
            .ok_or_else(|| TenantError::NotConnected(peer.clone()))?;
        Ok(connection
            .master_key_encrypted_shared_secret
            .unwrap(&self.master_key)?)
    }
}

#[async_trait]
impl ConnectionSecrets for ConnectionRegistry {
    async fn shared_secret_for(&self, sender: &IdentityId) -> Option<SymmetricKey> {
        let issued = self.issued.read().await;
        let connection = issued.get(sender)?;
        match connection
            .master_key_encrypted_shared_secret
            .unwrap(&self.master_key)
        {
            Ok(secret) => Some(secret),
            Err(e) => {
                tracing::warn!(%sender, error = %e, "cannot unwrap connection secret");
                None
            }
        }
    }
}

#[async_trait]
impl RecipientTokens for ConnectionRegistry {
    async fn token_for(&self, recipient: &IdentityId) -> Option<ClientAuthenticationToken> {
        self.accepted
            .read()
            .await
            .get(recipient)
            .map(|c| c.token.duplicate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerdrive_perms::{ClientTokenType, ExchangeGrantService, MemoryDriveManager, PermissionSet};

    fn peer() -> IdentityId {
        IdentityId::new("sam.example").unwrap()
    }

    async fn issue(service: &ExchangeGrantService<MemoryDriveManager>) -> (ExchangeGrant, AccessRegistration, ClientAccessToken) {
        let kssk = SymmetricKey::generate();
        let grant = service
            .create_exchange_grant(&kssk, PermissionSet::new(), &[], None, None)
            .await
            .unwrap();
        let (registration, token) = service
            .create_client_access_token(Some(&kssk), ClientTokenType::Transit, None)
            .unwrap();
        (grant, registration, token)
    }

    #[tokio::test]
    async fn test_issued_secret_round_trips_through_master_key() {
        let registry = ConnectionRegistry::new(Arc::new(SymmetricKey::generate()));
        let service = ExchangeGrantService::new(Arc::new(MemoryDriveManager::new()));
        let (grant, registration, token) = issue(&service).await;

        registry
            .record_issued(peer(), grant, registration, &token.shared_secret)
            .await
            .unwrap();

        let secret = registry.shared_secret_for(&peer()).await.unwrap();
        assert_eq!(secret, token.shared_secret);
        assert!(registry.shared_secret_for(&IdentityId::new("merry.example").unwrap()).await.is_none());
    }

    #[tokio::test]
    async fn test_revoke_marks_grant_and_registration() {
        let registry = ConnectionRegistry::new(Arc::new(SymmetricKey::generate()));
        let service = ExchangeGrantService::new(Arc::new(MemoryDriveManager::new()));
        let (grant, registration, token) = issue(&service).await;
        registry
            .record_issued(peer(), grant, registration, &token.shared_secret)
            .await
            .unwrap();

        assert!(registry.revoke(&peer()).await);
        let (grant, registration) = registry.issued(&peer()).await.unwrap();
        assert!(grant.is_revoked);
        assert!(registration.assert_valid().is_err());
        assert!(registry.issued_grant(&peer()).await.unwrap().is_revoked);

        assert!(!registry.revoke(&IdentityId::new("merry.example").unwrap()).await);
    }

    #[tokio::test]
    async fn test_accepted_token_and_secret() {
        let registry = ConnectionRegistry::new(Arc::new(SymmetricKey::generate()));
        let service = ExchangeGrantService::new(Arc::new(MemoryDriveManager::new()));
        let (_, _, token) = issue(&service).await;

        assert!(matches!(
            registry.outbound_secret(&peer()).await,
            Err(TenantError::NotConnected(_))
        ));

        registry.record_accepted(peer(), &token).await.unwrap();
        assert!(registry.is_accepted(&peer()).await);
        assert_eq!(registry.outbound_secret(&peer()).await.unwrap(), token.shared_secret);

        let presented = registry.token_for(&peer()).await.unwrap();
        assert_eq!(presented.id, token.id);
    }
}
