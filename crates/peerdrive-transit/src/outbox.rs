//! Outbound delivery.
//!
//! One outbox item exists per (file, recipient). A batch pops due items and
//! delivers them concurrently; each recipient's outcome is settled on its own,
//! so one slow or failing peer never holds back the rest.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use peerdrive_core::{now_millis, IdentityId, InternalDriveFileId, ItemId};
use peerdrive_perms::ClientAuthenticationToken;
use peerdrive_store::{Outbox, OutboxItem, OutboxItemKind, Popped, QueueStore, RetryPolicy};

use crate::error::{Result, TransitError};
use crate::messages::{decode, PushNotification, TransferEnvelope, TransferStatus, TransitResponseCode};
use crate::transport::PeerTransport;

/// Resolves the token a recipient issued to us.
#[async_trait]
pub trait RecipientTokens: Send + Sync {
    async fn token_for(&self, recipient: &IdentityId) -> Option<ClientAuthenticationToken>;
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub item_id: ItemId,
    pub recipient: IdentityId,
    pub file: InternalDriveFileId,
    pub kind: OutboxItemKind,
    pub status: TransferStatus,
    /// The recipient's answer, when one was received.
    pub response: Option<TransitResponseCode>,
}

enum Attempt {
    Responded(TransitResponseCode),
    NotConnected,
    Undecodable(String),
    Failed(TransitError),
}

fn status_for(code: TransitResponseCode) -> TransferStatus {
    match code {
        TransitResponseCode::AcceptedDirectWrite => TransferStatus::DeliveredToTargetDrive,
        TransitResponseCode::AcceptedIntoInbox => TransferStatus::DeliveredToInbox,
        TransitResponseCode::AccessDenied => TransferStatus::RecipientReturnedAccessDenied,
        TransitResponseCode::QuarantinedSenderNotConnected => TransferStatus::RecipientNotConnected,
        TransitResponseCode::Rejected | TransitResponseCode::QuarantinedPayload => {
            TransferStatus::Rejected
        }
    }
}

pub struct OutboxProcessor<Q> {
    sender: IdentityId,
    outbox: Outbox<Q>,
    retry: RetryPolicy,
}

impl<Q: QueueStore + 'static> OutboxProcessor<Q> {
    pub fn new(sender: IdentityId, outbox: Outbox<Q>, retry: RetryPolicy) -> Self {
        Self {
            sender,
            outbox,
            retry,
        }
    }

    /// Deliver up to `limit` due items.
    ///
    /// Returns one report per settled item. An item whose outcome could not
    /// be recorded is logged and left reserved for recovery; the rest of the
    /// batch is still settled.
    pub async fn process_batch(
        &self,
        limit: usize,
        transport: Arc<dyn PeerTransport>,
        tokens: Arc<dyn RecipientTokens>,
    ) -> Result<Vec<DeliveryReport>> {
        let popped = self.outbox.pop(None, now_millis(), limit.max(1)).await?;
        if popped.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(count = popped.len(), "delivering outbox batch");

        let mut deliveries = JoinSet::new();
        for item in popped {
            let sender = self.sender.clone();
            let transport = Arc::clone(&transport);
            let tokens = Arc::clone(&tokens);
            deliveries.spawn(async move {
                let attempt = deliver_one(&sender, &item.item, transport.as_ref(), tokens.as_ref()).await;
                (item, attempt)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((item, attempt)) => {
                    let (item_id, recipient) = (item.item.id, item.item.recipient.clone());
                    match self.settle(item, attempt).await {
                        Ok(report) => reports.push(report),
                        // Left reserved; comes back after recovery.
                        Err(e) => {
                            tracing::error!(%item_id, %recipient, error = %e, "failed to settle delivery")
                        }
                    }
                }
                // The item stays reserved and comes back after recovery.
                Err(e) => tracing::error!(error = %e, "delivery task failed"),
            }
        }
        Ok(reports)
    }

    async fn settle(&self, popped: Popped<OutboxItem>, attempt: Attempt) -> Result<DeliveryReport> {
        let item = &popped.item;
        let now = now_millis();

        let (status, response) = match attempt {
            Attempt::Responded(code) => {
                self.outbox.complete(&popped).await?;
                (status_for(code), Some(code))
            }
            Attempt::NotConnected => {
                self.outbox.complete(&popped).await?;
                (TransferStatus::RecipientNotConnected, None)
            }
            Attempt::Undecodable(reason) => {
                self.outbox.dead_letter(&popped, &reason, now).await?;
                (TransferStatus::Rejected, None)
            }
            Attempt::Failed(e) => {
                let attempts = popped.attempt_count + 1;
                if self.retry.is_exhausted(attempts) {
                    self.outbox
                        .dead_letter(&popped, &format!("retry limit reached: {}", e), now)
                        .await?;
                    (TransferStatus::RetryLimitReached, None)
                } else {
                    self.outbox
                        .fail(&popped, self.retry.next_run_at(attempts, now))
                        .await?;
                    tracing::debug!(item_id = %item.id, recipient = %item.recipient, attempts, error = %e, "delivery deferred");
                    (TransferStatus::PendingRetry, None)
                }
            }
        };

        match status {
            TransferStatus::DeliveredToTargetDrive | TransferStatus::DeliveredToInbox => {
                tracing::info!(item_id = %item.id, recipient = %item.recipient, ?status, "delivered");
            }
            TransferStatus::PendingRetry => {}
            _ => {
                tracing::warn!(item_id = %item.id, recipient = %item.recipient, ?status, "delivery ended without acceptance");
            }
        }

        Ok(DeliveryReport {
            item_id: item.id,
            recipient: item.recipient.clone(),
            file: item.file,
            kind: item.kind,
            status,
            response,
        })
    }
}

async fn deliver_one(
    sender: &IdentityId,
    item: &OutboxItem,
    transport: &dyn PeerTransport,
    tokens: &dyn RecipientTokens,
) -> Attempt {
    let Some(token) = tokens.token_for(&item.recipient).await else {
        return Attempt::NotConnected;
    };

    let result = match item.kind {
        OutboxItemKind::File => match decode::<TransferEnvelope>(&item.state) {
            Ok(envelope) => transport.deliver(sender, &item.recipient, &token, envelope).await,
            Err(e) => return Attempt::Undecodable(e.to_string()),
        },
        OutboxItemKind::PushNotification => match decode::<PushNotification>(&item.state) {
            Ok(notification) => {
                transport
                    .push_notification(sender, &item.recipient, &token, notification)
                    .await
            }
            Err(e) => return Attempt::Undecodable(e.to_string()),
        },
    };

    match result {
        Ok(code) => Attempt::Responded(code),
        Err(e) => Attempt::Failed(e),
    }
}
