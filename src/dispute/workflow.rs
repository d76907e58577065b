use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppResult, DisputeError, EscrowError};
use crate::escrow::machine::TransactionStateMachine;
use crate::events::{EscrowEvent, EventBus};
use crate::ledger::models::{
    DisputeCase, DisputeOutcome, DisputeStatus, EscrowTransaction, TransactionStatus,
};
use crate::ledger::store::LedgerStore;

/// Dispute workflow - owns the DisputeCase lifecycle independent of payment
/// mechanics. Transaction status changes go through the state machine; this
/// component only decides when they are asked for.
pub struct DisputeWorkflow {
    store: Arc<dyn LedgerStore>,
    machine: Arc<TransactionStateMachine>,
    events: EventBus,
}

impl DisputeWorkflow {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        machine: Arc<TransactionStateMachine>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            machine,
            events,
        }
    }

    /// Open a dispute against a held transaction. The initiator must be a
    /// party to the transaction, and the transaction must currently be held.
    pub async fn open(
        &self,
        transaction_id: Uuid,
        initiator_id: Uuid,
        reason: String,
        description: String,
    ) -> AppResult<(EscrowTransaction, DisputeCase)> {
        let tx = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or(EscrowError::NotFound(transaction_id))?;

        if tx.status != TransactionStatus::Held {
            return Err(DisputeError::InvalidPrecondition(format!(
                "transaction {} is {}, disputes require held",
                transaction_id, tx.status
            ))
            .into());
        }
        if initiator_id != tx.payer_id && initiator_id != tx.receiver_id {
            return Err(DisputeError::InvalidPrecondition(format!(
                "user {} is not a party to transaction {}",
                initiator_id, transaction_id
            ))
            .into());
        }
        if self.store.active_dispute_for(transaction_id).await?.is_some() {
            return Err(DisputeError::InvalidPrecondition(format!(
                "transaction {} already has an active dispute",
                transaction_id
            ))
            .into());
        }

        let dispute = DisputeCase {
            id: Uuid::new_v4(),
            transaction_id,
            initiator_id,
            reason,
            description,
            status: DisputeStatus::Open,
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
            version: 1,
        };

        // Atomic with the status flip; the store re-checks single-case-ness
        let (tx, dispute) = self.machine.flag_disputed(transaction_id, dispute).await?;
        info!(dispute_id = %dispute.id, transaction_id = %tx.id, "dispute opened");
        Ok((tx, dispute))
    }

    /// Move a dispute into investigation. Idempotent when already there.
    pub async fn investigate(&self, dispute_id: Uuid) -> AppResult<DisputeCase> {
        let dispute = self.load(dispute_id).await?;

        match dispute.status {
            DisputeStatus::Investigating => Ok(dispute),
            DisputeStatus::Open => {
                let mut updated = dispute;
                updated.status = DisputeStatus::Investigating;
                self.store.update_dispute(&updated).await
            }
            current => Err(DisputeError::InvalidState {
                current,
                expected: "open or investigating".to_string(),
            }
            .into()),
        }
    }

    /// Resolve a dispute with an outcome and apply the corresponding
    /// transaction transition. Fails with `TransactionNotDisputed` if the
    /// owning transaction left `disputed` through another path.
    pub async fn resolve(
        &self,
        dispute_id: Uuid,
        outcome: DisputeOutcome,
        resolution_note: String,
    ) -> AppResult<(EscrowTransaction, DisputeCase)> {
        let dispute = self.load(dispute_id).await?;

        if !dispute.status.is_active() {
            return Err(DisputeError::InvalidState {
                current: dispute.status,
                expected: "open or investigating".to_string(),
            }
            .into());
        }

        let tx = self
            .store
            .get_transaction(dispute.transaction_id)
            .await?
            .ok_or(EscrowError::NotFound(dispute.transaction_id))?;

        if tx.status != TransactionStatus::Disputed {
            warn!(
                dispute_id = %dispute.id,
                transaction_id = %tx.id,
                status = %tx.status,
                "resolve refused: transaction no longer disputed"
            );
            return Err(DisputeError::TransactionNotDisputed {
                transaction_id: tx.id,
                current: tx.status,
            }
            .into());
        }

        // The dispute must stop being active before the transition, since
        // release refuses to act while an active case exists.
        let prior_status = dispute.status;
        let mut resolved = dispute;
        resolved.status = DisputeStatus::Resolved;
        resolved.resolution = Some(resolution_note.clone());
        resolved.resolved_at = Some(Utc::now());
        let resolved = self.store.update_dispute(&resolved).await?;

        let transition = match outcome {
            DisputeOutcome::Release => self.machine.release(resolved.transaction_id).await,
            DisputeOutcome::Refund => self.machine.refund(resolved.transaction_id).await,
        };

        let tx = match transition {
            Ok(tx) => tx,
            Err(e) => {
                // Put the case back so a failed transition is retryable
                let mut reverted = resolved.clone();
                reverted.status = prior_status;
                reverted.resolution = None;
                reverted.resolved_at = None;
                self.store.update_dispute(&reverted).await?;
                return Err(e);
            }
        };

        self.events.publish(EscrowEvent::DisputeResolved {
            dispute_id: resolved.id,
            transaction_id: tx.id,
            resolution: resolution_note,
        });
        Ok((tx, resolved))
    }

    /// Close a resolved dispute. Administrative only; the transaction is
    /// untouched.
    pub async fn close(&self, dispute_id: Uuid) -> AppResult<DisputeCase> {
        let dispute = self.load(dispute_id).await?;

        if dispute.status != DisputeStatus::Resolved {
            return Err(DisputeError::InvalidState {
                current: dispute.status,
                expected: "resolved".to_string(),
            }
            .into());
        }

        let mut closed = dispute;
        closed.status = DisputeStatus::Closed;
        self.store.update_dispute(&closed).await
    }

    async fn load(&self, dispute_id: Uuid) -> AppResult<DisputeCase> {
        self.store
            .get_dispute(dispute_id)
            .await?
            .ok_or_else(|| DisputeError::NotFound(dispute_id).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::escrow::machine::CreateTransaction;
    use crate::escrow::payment::AutoApproveGateway;
    use crate::ledger::MemoryLedgerStore;
    use rust_decimal_macros::dec;

    struct Fixture {
        machine: Arc<TransactionStateMachine>,
        workflow: DisputeWorkflow,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::new());
        let events = EventBus::default();
        let machine = Arc::new(TransactionStateMachine::new(
            store.clone(),
            Arc::new(AutoApproveGateway::default()),
            events.clone(),
            dec!(0.05),
        ));
        let workflow = DisputeWorkflow::new(store, machine.clone(), events);
        Fixture { machine, workflow }
    }

    async fn held_transaction(fx: &Fixture) -> EscrowTransaction {
        fx.machine
            .create(CreateTransaction {
                subscription_id: Uuid::new_v4(),
                payer_id: Uuid::new_v4(),
                receiver_id: Uuid::new_v4(),
                amount: dec!(3.99),
                escrow_fee: None,
                release_date: Utc::now() + chrono::Duration::days(30),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn full_dispute_scenario_ending_in_release() {
        let fx = fixture();
        let tx = held_transaction(&fx).await;

        let (tx, dispute) = fx
            .workflow
            .open(
                tx.id,
                tx.payer_id,
                "Service Access".to_string(),
                "Credentials provided do not work".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Disputed);
        assert_eq!(dispute.status, DisputeStatus::Open);
        assert_eq!(tx.dispute_reason.as_deref(), Some("Service Access"));

        let dispute = fx.workflow.investigate(dispute.id).await.unwrap();
        assert_eq!(dispute.status, DisputeStatus::Investigating);

        // Idempotent second call
        let dispute = fx.workflow.investigate(dispute.id).await.unwrap();
        assert_eq!(dispute.status, DisputeStatus::Investigating);

        let (tx, dispute) = fx
            .workflow
            .resolve(
                dispute.id,
                DisputeOutcome::Release,
                "access restored".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Released);
        assert_eq!(dispute.status, DisputeStatus::Resolved);
        assert_eq!(dispute.resolution.as_deref(), Some("access restored"));
        assert!(dispute.resolved_at.is_some());

        let dispute = fx.workflow.close(dispute.id).await.unwrap();
        assert_eq!(dispute.status, DisputeStatus::Closed);
    }

    #[tokio::test]
    async fn resolve_with_refund_outcome() {
        let fx = fixture();
        let tx = held_transaction(&fx).await;
        let (_, dispute) = fx
            .workflow
            .open(tx.id, tx.receiver_id, "Chargeback".into(), String::new())
            .await
            .unwrap();

        let (tx, dispute) = fx
            .workflow
            .resolve(dispute.id, DisputeOutcome::Refund, "payer made whole".into())
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Refunded);
        assert_eq!(dispute.status, DisputeStatus::Resolved);
    }

    #[tokio::test]
    async fn open_requires_held_transaction() {
        let fx = fixture();
        let tx = held_transaction(&fx).await;
        fx.machine.release(tx.id).await.unwrap();

        let err = fx
            .workflow
            .open(tx.id, tx.payer_id, "too late".into(), String::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Dispute(DisputeError::InvalidPrecondition(_))
        ));
    }

    #[tokio::test]
    async fn open_requires_party_to_transaction() {
        let fx = fixture();
        let tx = held_transaction(&fx).await;

        let err = fx
            .workflow
            .open(tx.id, Uuid::new_v4(), "outsider".into(), String::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Dispute(DisputeError::InvalidPrecondition(_))
        ));
    }

    #[tokio::test]
    async fn only_one_active_dispute_per_transaction() {
        let fx = fixture();
        let tx = held_transaction(&fx).await;
        fx.workflow
            .open(tx.id, tx.payer_id, "first".into(), String::new())
            .await
            .unwrap();

        let err = fx
            .workflow
            .open(tx.id, tx.receiver_id, "second".into(), String::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Dispute(_)));
    }

    #[tokio::test]
    async fn resolve_fails_when_transaction_left_disputed() {
        let fx = fixture();
        let tx = held_transaction(&fx).await;
        let (_, dispute) = fx
            .workflow
            .open(tx.id, tx.payer_id, "Service Access".into(), String::new())
            .await
            .unwrap();

        // Refunded through another path while the case was pending
        fx.machine.refund(tx.id).await.unwrap();

        let err = fx
            .workflow
            .resolve(dispute.id, DisputeOutcome::Release, "moot".into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Dispute(DisputeError::TransactionNotDisputed { .. })
        ));
    }

    /// Store wrapper that stalls transaction reads, widening the window in
    /// which two resolvers see the same disputed transaction (as two
    /// service instances sharing one database would).
    struct SlowTransactionReads(Arc<MemoryLedgerStore>);

    #[async_trait::async_trait]
    impl LedgerStore for SlowTransactionReads {
        async fn insert_transaction(&self, tx: EscrowTransaction) -> AppResult<EscrowTransaction> {
            self.0.insert_transaction(tx).await
        }
        async fn get_transaction(&self, id: Uuid) -> AppResult<Option<EscrowTransaction>> {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.0.get_transaction(id).await
        }
        async fn list_transactions(
            &self,
            status: Option<TransactionStatus>,
        ) -> AppResult<Vec<EscrowTransaction>> {
            self.0.list_transactions(status).await
        }
        async fn due_for_release(
            &self,
            now: chrono::DateTime<Utc>,
        ) -> AppResult<Vec<EscrowTransaction>> {
            self.0.due_for_release(now).await
        }
        async fn update_transaction(&self, tx: &EscrowTransaction) -> AppResult<EscrowTransaction> {
            self.0.update_transaction(tx).await
        }
        async fn open_dispute(
            &self,
            tx: &EscrowTransaction,
            dispute: DisputeCase,
        ) -> AppResult<(EscrowTransaction, DisputeCase)> {
            self.0.open_dispute(tx, dispute).await
        }
        async fn get_dispute(&self, id: Uuid) -> AppResult<Option<DisputeCase>> {
            self.0.get_dispute(id).await
        }
        async fn list_disputes(&self) -> AppResult<Vec<DisputeCase>> {
            self.0.list_disputes().await
        }
        async fn active_dispute_for(&self, transaction_id: Uuid) -> AppResult<Option<DisputeCase>> {
            self.0.active_dispute_for(transaction_id).await
        }
        async fn update_dispute(&self, dispute: &DisputeCase) -> AppResult<DisputeCase> {
            self.0.update_dispute(dispute).await
        }
        async fn summary(&self) -> AppResult<crate::ledger::models::EscrowSummary> {
            self.0.summary().await
        }
        async fn subscription_rollup(
            &self,
            subscription_id: Uuid,
        ) -> AppResult<crate::ledger::models::SubscriptionRollup> {
            self.0.subscription_rollup(subscription_id).await
        }
    }

    #[tokio::test]
    async fn racing_resolvers_leave_no_stranded_dispute() {
        let store: Arc<dyn LedgerStore> =
            Arc::new(SlowTransactionReads(Arc::new(MemoryLedgerStore::new())));
        let events = EventBus::default();
        let machine = Arc::new(TransactionStateMachine::new(
            store.clone(),
            Arc::new(AutoApproveGateway::default()),
            events.clone(),
            dec!(0.05),
        ));
        let workflow = DisputeWorkflow::new(store.clone(), machine.clone(), events);

        let tx = machine
            .create(CreateTransaction {
                subscription_id: Uuid::new_v4(),
                payer_id: Uuid::new_v4(),
                receiver_id: Uuid::new_v4(),
                amount: dec!(3.99),
                escrow_fee: None,
                release_date: Utc::now() + chrono::Duration::days(30),
            })
            .await
            .unwrap();
        let (_, dispute) = workflow
            .open(tx.id, tx.payer_id, "Service Access".into(), String::new())
            .await
            .unwrap();

        // Both resolvers read the same dispute version; the stalled
        // transaction read lets them interleave before either writes.
        let (a, b) = tokio::join!(
            workflow.resolve(dispute.id, DisputeOutcome::Release, "winner".into()),
            workflow.resolve(dispute.id, DisputeOutcome::Refund, "loser".into()),
        );
        let winners = a.is_ok() as usize + b.is_ok() as usize;
        assert_eq!(winners, 1, "exactly one resolve may commit");

        // The loser must not have clobbered the case back to active
        let case = store.get_dispute(dispute.id).await.unwrap().unwrap();
        assert_eq!(case.status, DisputeStatus::Resolved);
        assert!(store.active_dispute_for(tx.id).await.unwrap().is_none());
        let tx = store.get_transaction(tx.id).await.unwrap().unwrap();
        assert!(tx.status.is_terminal());

        // And the lifecycle still completes
        let closed = workflow.close(dispute.id).await.unwrap();
        assert_eq!(closed.status, DisputeStatus::Closed);
    }

    #[tokio::test]
    async fn close_requires_resolved() {
        let fx = fixture();
        let tx = held_transaction(&fx).await;
        let (_, dispute) = fx
            .workflow
            .open(tx.id, tx.payer_id, "Service Access".into(), String::new())
            .await
            .unwrap();

        let err = fx.workflow.close(dispute.id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Dispute(DisputeError::InvalidState { .. })
        ));
    }
}
