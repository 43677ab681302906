//! Transport abstraction between identities.
//!
//! The sending side sees a [`PeerTransport`]; the receiving side exposes a
//! [`PeerEndpoint`]. Implementations may use HTTPS or anything else. The
//! token presented is the one the recipient issued to the sender when the
//! connection was made.

use async_trait::async_trait;

use peerdrive_core::IdentityId;
use peerdrive_perms::ClientAuthenticationToken;

use crate::error::Result;
use crate::messages::{PushNotification, TransferEnvelope, TransitResponseCode};

/// Receiving side of a tenant's perimeter.
#[async_trait]
pub trait PeerEndpoint: Send + Sync {
    /// Accept a complete transfer from `sender`.
    async fn receive_transfer(
        &self,
        sender: &IdentityId,
        token: &ClientAuthenticationToken,
        envelope: TransferEnvelope,
    ) -> Result<TransitResponseCode>;

    /// Accept a push notification relayed by `sender`.
    async fn receive_push_notification(
        &self,
        sender: &IdentityId,
        token: &ClientAuthenticationToken,
        notification: PushNotification,
    ) -> Result<TransitResponseCode>;
}

/// Sending side: reach another identity's endpoint.
///
/// An `Err` means no response was obtained and the delivery may be retried.
/// A response code, even a rejection, is final for that attempt.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn deliver(
        &self,
        sender: &IdentityId,
        recipient: &IdentityId,
        token: &ClientAuthenticationToken,
        envelope: TransferEnvelope,
    ) -> Result<TransitResponseCode>;

    async fn push_notification(
        &self,
        sender: &IdentityId,
        recipient: &IdentityId,
        token: &ClientAuthenticationToken,
        notification: PushNotification,
    ) -> Result<TransitResponseCode>;
}

/// In-process network of endpoints, for tests and single-host setups.
///
/// Envelopes and tokens go through their wire encodings on the way, so a
/// delivery here exercises the same serialization as a remote one.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    use crate::error::TransitError;
    use crate::messages::{decode, encode};

    #[derive(Default)]
    pub struct MemoryPeerNetwork {
        endpoints: RwLock<HashMap<IdentityId, Arc<dyn PeerEndpoint>>>,
    }

    impl MemoryPeerNetwork {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub async fn register(&self, identity: IdentityId, endpoint: Arc<dyn PeerEndpoint>) {
            self.endpoints.write().await.insert(identity, endpoint);
        }

        /// Take an identity offline. Deliveries to it fail until it is
        /// registered again.
        pub async fn unregister(&self, identity: &IdentityId) -> bool {
            self.endpoints.write().await.remove(identity).is_some()
        }

        async fn endpoint(&self, recipient: &IdentityId) -> Result<Arc<dyn PeerEndpoint>> {
            self.endpoints
                .read()
                .await
                .get(recipient)
                .cloned()
                .ok_or_else(|| TransitError::Transport(format!("{} is unreachable", recipient)))
        }
    }

    fn over_the_wire(token: &ClientAuthenticationToken) -> Result<ClientAuthenticationToken> {
        let portable = token.to_portable();
        Ok(ClientAuthenticationToken::from_portable(&portable)?)
    }

    #[async_trait]
    impl PeerTransport for MemoryPeerNetwork {
        async fn deliver(
            &self,
            sender: &IdentityId,
            recipient: &IdentityId,
            token: &ClientAuthenticationToken,
            envelope: TransferEnvelope,
        ) -> Result<TransitResponseCode> {
            let endpoint = self.endpoint(recipient).await?;
            let envelope: TransferEnvelope = decode(&encode(&envelope)?)?;
            let token = over_the_wire(token)?;
            tracing::trace!(%sender, %recipient, parts = envelope.parts.len(), "memory delivery");
            endpoint.receive_transfer(sender, &token, envelope).await
        }

        async fn push_notification(
            &self,
            sender: &IdentityId,
            recipient: &IdentityId,
            token: &ClientAuthenticationToken,
            notification: PushNotification,
        ) -> Result<TransitResponseCode> {
            let endpoint = self.endpoint(recipient).await?;
            let notification: PushNotification = decode(&encode(&notification)?)?;
            let token = over_the_wire(token)?;
            endpoint
                .receive_push_notification(sender, &token, notification)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryPeerNetwork;
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    use peerdrive_core::{FileSystemType, GlobalTransitId, TargetDrive};
    use peerdrive_perms::{ClientTokenType, ExchangeGrantService, MemoryDriveManager};

    use crate::error::TransitError;
    use crate::messages::{FileMetadata, PartKind, TransferInstructionSet};

    #[derive(Default)]
    struct RecordingEndpoint {
        received: Mutex<Vec<(IdentityId, TransferEnvelope)>>,
    }

    #[async_trait]
    impl PeerEndpoint for RecordingEndpoint {
        async fn receive_transfer(
            &self,
            sender: &IdentityId,
            _token: &ClientAuthenticationToken,
            envelope: TransferEnvelope,
        ) -> Result<TransitResponseCode> {
            self.received.lock().await.push((sender.clone(), envelope));
            Ok(TransitResponseCode::AcceptedDirectWrite)
        }

        async fn receive_push_notification(
            &self,
            _sender: &IdentityId,
            _token: &ClientAuthenticationToken,
            _notification: PushNotification,
        ) -> Result<TransitResponseCode> {
            Ok(TransitResponseCode::AcceptedDirectWrite)
        }
    }

    fn token() -> ClientAuthenticationToken {
        let service = ExchangeGrantService::new(Arc::new(MemoryDriveManager::new()));
        let (_, access) = service
            .create_client_access_token(None, ClientTokenType::Transit, None)
            .unwrap();
        access.to_authentication_token()
    }

    #[tokio::test]
    async fn test_delivery_reaches_registered_endpoint() {
        let network = MemoryPeerNetwork::new();
        let bob = IdentityId::new("bob.example").unwrap();
        let alice = IdentityId::new("alice.example").unwrap();
        let endpoint = Arc::new(RecordingEndpoint::default());
        network.register(bob.clone(), endpoint.clone()).await;

        let envelope = TransferEnvelope::new(
            TransferInstructionSet::save_file(TargetDrive::random(), FileSystemType::Standard),
            FileMetadata {
                global_transit_id: Some(GlobalTransitId::random()),
                ..Default::default()
            },
        )
        .with_part(PartKind::payload("main"), b"hello".to_vec());

        let code = network
            .deliver(&alice, &bob, &token(), envelope.clone())
            .await
            .unwrap();
        assert_eq!(code, TransitResponseCode::AcceptedDirectWrite);

        let received = endpoint.received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, alice);
        assert_eq!(received[0].1, envelope);
    }

    #[tokio::test]
    async fn test_unreachable_recipient_is_transport_error() {
        let network = MemoryPeerNetwork::new();
        let bob = IdentityId::new("bob.example").unwrap();
        network
            .register(bob.clone(), Arc::new(RecordingEndpoint::default()))
            .await;
        assert!(network.unregister(&bob).await);

        let err = network
            .push_notification(
                &IdentityId::new("alice.example").unwrap(),
                &bob,
                &token(),
                PushNotification {
                    global_transit_id: None,
                    options: Default::default(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransitError::Transport(_)));
    }
}
