use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info};

use crate::error::AppResult;
use crate::escrow::machine::TransactionStateMachine;
use crate::ledger::models::TransactionStatus;
use crate::ledger::store::LedgerStore;

/// Release scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the sweep runs. Release dates have day granularity, so a
    /// couple of minutes is plenty.
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(120),
        }
    }
}

/// Release scheduler - periodically releases every held transaction whose
/// release date has passed. The sweep is check-then-act: each candidate is
/// re-read right before acting, and the state machine's transition guard is
/// the real enforcement point for anything that changed in between. A sweep
/// failure is never fatal; the record is retried on the next pass.
pub struct ReleaseScheduler {
    config: SchedulerConfig,
    store: Arc<dyn LedgerStore>,
    machine: Arc<TransactionStateMachine>,
}

impl ReleaseScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn LedgerStore>,
        machine: Arc<TransactionStateMachine>,
    ) -> Self {
        Self {
            config,
            store,
            machine,
        }
    }

    /// Start the sweep loop in the background. Flipping the shutdown signal
    /// stops the loop after the in-flight sweep finishes, so no record is
    /// left mid-transition.
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.sweep_once().await {
                            Ok(0) => {}
                            Ok(released) => info!(released, "release sweep completed"),
                            Err(e) => error!("release sweep failed: {:?}", e),
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("release scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// One sweep pass. Returns how many transactions were released.
    /// Idempotent: a record released by an earlier pass (or any competing
    /// writer) is no longer `held` and is skipped.
    pub async fn sweep_once(&self) -> AppResult<usize> {
        let now = Utc::now();
        let candidates = self.store.due_for_release(now).await?;
        let mut released = 0;

        for candidate in candidates {
            // Re-read: the record may have been disputed or released since
            // the sweep started.
            let current = match self.store.get_transaction(candidate.id).await {
                Ok(Some(tx)) => tx,
                Ok(None) => continue,
                Err(e) => {
                    error!(transaction_id = %candidate.id, "sweep read failed: {:?}", e);
                    continue;
                }
            };
            if current.status != TransactionStatus::Held {
                continue;
            }

            match self.machine.release(current.id).await {
                Ok(_) => released += 1,
                // Lost the race to a dispute or competing release; the
                // transition guard did its job. Retry next sweep if the
                // record is still eligible.
                Err(e) => {
                    error!(transaction_id = %current.id, "sweep release failed: {:?}", e);
                }
            }
        }

        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::payment::AutoApproveGateway;
    use crate::events::EventBus;
    use crate::ledger::models::EscrowTransaction;
    use crate::ledger::MemoryLedgerStore;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Fixture {
        scheduler: ReleaseScheduler,
        store: Arc<MemoryLedgerStore>,
        machine: Arc<TransactionStateMachine>,
        events: EventBus,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryLedgerStore::new());
        let events = EventBus::default();
        let machine = Arc::new(TransactionStateMachine::new(
            store.clone(),
            Arc::new(AutoApproveGateway::default()),
            events.clone(),
            dec!(0.05),
        ));
        let scheduler = ReleaseScheduler::new(
            SchedulerConfig::default(),
            store.clone(),
            machine.clone(),
        );
        Fixture {
            scheduler,
            store,
            machine,
            events,
        }
    }

    async fn held_due_transaction(store: &MemoryLedgerStore) -> EscrowTransaction {
        let now = Utc::now();
        let tx = EscrowTransaction {
            id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            payer_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            amount: dec!(3.99),
            escrow_fee: dec!(0.20),
            status: TransactionStatus::Held,
            dispute_reason: None,
            created_at: now - chrono::Duration::days(31),
            release_date: now - chrono::Duration::days(1),
            released_at: None,
            refunded_at: None,
            version: 1,
        };
        store.insert_transaction(tx).await.unwrap()
    }

    #[tokio::test]
    async fn sweep_releases_due_transactions_exactly_once() {
        let fx = fixture();
        let tx = held_due_transaction(&fx.store).await;
        let mut events = fx.events.subscribe();

        assert_eq!(fx.scheduler.sweep_once().await.unwrap(), 1);
        let released = fx.store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(released.status, TransactionStatus::Released);

        // Second sweep is a no-op: the record is no longer held
        assert_eq!(fx.scheduler.sweep_once().await.unwrap(), 0);

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            crate::events::EscrowEvent::FundsReleased { .. }
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn sweep_skips_disputed_transactions() {
        let fx = fixture();
        let tx = held_due_transaction(&fx.store).await;

        let dispute = crate::ledger::models::DisputeCase {
            id: Uuid::new_v4(),
            transaction_id: tx.id,
            initiator_id: tx.payer_id,
            reason: "Service Access".to_string(),
            description: String::new(),
            status: crate::ledger::models::DisputeStatus::Open,
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
            version: 1,
        };
        fx.machine.flag_disputed(tx.id, dispute).await.unwrap();

        assert_eq!(fx.scheduler.sweep_once().await.unwrap(), 0);
        let current = fx.store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(current.status, TransactionStatus::Disputed);
    }

    #[tokio::test]
    async fn one_bad_record_does_not_block_the_sweep() {
        let fx = fixture();
        let first = held_due_transaction(&fx.store).await;
        held_due_transaction(&fx.store).await;

        // First record gets released by a competing writer mid-sweep; the
        // re-read check turns it into a skip, not a failure.
        fx.machine.release(first.id).await.unwrap();

        assert_eq!(fx.scheduler.sweep_once().await.unwrap(), 1);
        let all = fx
            .store
            .list_transactions(Some(TransactionStatus::Released))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn no_release_before_release_date() {
        let fx = fixture();
        let now = Utc::now();
        let mut tx = held_due_transaction(&fx.store).await;
        tx.release_date = now + chrono::Duration::days(5);
        fx.store.update_transaction(&tx).await.unwrap();

        assert_eq!(fx.scheduler.sweep_once().await.unwrap(), 0);
    }
}
