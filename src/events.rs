use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

/// Ledger lifecycle events for downstream notification (email/UI)
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EscrowEvent {
    FundsReleased {
        transaction_id: Uuid,
        subscription_id: Uuid,
        receiver_id: Uuid,
        amount: Decimal,
        released_at: DateTime<Utc>,
    },
    FundsRefunded {
        transaction_id: Uuid,
        payer_id: Uuid,
        amount: Decimal,
        refunded_at: DateTime<Utc>,
    },
    DisputeOpened {
        dispute_id: Uuid,
        transaction_id: Uuid,
        initiator_id: Uuid,
        reason: String,
    },
    DisputeResolved {
        dispute_id: Uuid,
        transaction_id: Uuid,
        resolution: String,
    },
}

/// Broadcast fan-out for escrow events. Senders never block; a consumer that
/// falls behind only loses its own backlog.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EscrowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishing with no subscribers is fine - the event is simply dropped
    pub fn publish(&self, event: EscrowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EscrowEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Background consumer that logs every event, standing in for the email/UI
/// notification pipeline.
pub fn spawn_notifier(bus: &EventBus) -> JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => match &event {
                    EscrowEvent::FundsReleased {
                        transaction_id,
                        receiver_id,
                        amount,
                        ..
                    } => info!(%transaction_id, %receiver_id, %amount, "funds released"),
                    EscrowEvent::FundsRefunded {
                        transaction_id,
                        payer_id,
                        amount,
                        ..
                    } => info!(%transaction_id, %payer_id, %amount, "funds refunded"),
                    EscrowEvent::DisputeOpened {
                        dispute_id,
                        transaction_id,
                        reason,
                        ..
                    } => info!(%dispute_id, %transaction_id, reason, "dispute opened"),
                    EscrowEvent::DisputeResolved {
                        dispute_id,
                        resolution,
                        ..
                    } => info!(%dispute_id, resolution, "dispute resolved"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    info!(skipped, "notifier lagged behind event stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(EscrowEvent::FundsReleased {
            transaction_id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            amount: dec!(3.99),
            released_at: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, EscrowEvent::FundsReleased { .. }));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let bus = EventBus::new(8);
        bus.publish(EscrowEvent::DisputeResolved {
            dispute_id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
            resolution: "refund".to_string(),
        });
    }
}
