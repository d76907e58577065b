use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppResult, EscrowError};
use crate::escrow::payment::PaymentGateway;
use crate::events::{EscrowEvent, EventBus};
use crate::ledger::models::{DisputeCase, EscrowTransaction, TransactionStatus};
use crate::ledger::store::LedgerStore;

/// Parameters for opening a new escrow transaction
#[derive(Debug, Clone)]
pub struct CreateTransaction {
    pub subscription_id: Uuid,
    pub payer_id: Uuid,
    pub receiver_id: Uuid,
    pub amount: Decimal,
    /// Defaults to `amount * fee_rate` when the caller does not set one
    pub escrow_fee: Option<Decimal>,
    pub release_date: DateTime<Utc>,
}

/// Transaction state machine - the single mutation path for transaction
/// status. Every transition is checked against the closed table below and
/// written back through the version-checked store, so two competing
/// transitions on one id can never both succeed.
pub struct TransactionStateMachine {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventBus,
    fee_rate: Decimal,
}

impl TransactionStateMachine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventBus,
        fee_rate: Decimal,
    ) -> Self {
        Self {
            store,
            gateway,
            events,
            fee_rate,
        }
    }

    /// Validate transaction status transitions
    /// Valid transitions:
    /// - Pending → Held
    /// - Held → Released, Disputed, Refunded
    /// - Disputed → Released, Refunded
    /// - Terminal states (Released, Refunded) → NO TRANSITIONS ALLOWED
    pub fn validate_transition(
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> AppResult<()> {
        let allowed = match from {
            TransactionStatus::Pending => vec![TransactionStatus::Held],
            TransactionStatus::Held => vec![
                TransactionStatus::Released,
                TransactionStatus::Disputed,
                TransactionStatus::Refunded,
            ],
            TransactionStatus::Disputed => {
                vec![TransactionStatus::Released, TransactionStatus::Refunded]
            }
            TransactionStatus::Released | TransactionStatus::Refunded => {
                return Err(EscrowError::InvalidStateTransition { from, to }.into());
            }
        };

        if !allowed.contains(&to) {
            return Err(EscrowError::InvalidStateTransition { from, to }.into());
        }

        Ok(())
    }

    /// Open a new escrow transaction.
    ///
    /// Synchronous two-step commit: the record starts `pending` in memory,
    /// the payment gateway authorizes the full charge (amount + fee), and
    /// only then does the record persist as `held`. A declined charge leaves
    /// no record behind.
    pub async fn create(&self, params: CreateTransaction) -> AppResult<EscrowTransaction> {
        let now = Utc::now();

        if params.amount < Decimal::ZERO {
            return Err(EscrowError::NegativeAmount(params.amount).into());
        }
        if let Some(fee) = params.escrow_fee {
            if fee < Decimal::ZERO {
                return Err(EscrowError::NegativeAmount(fee).into());
            }
        }
        if params.release_date <= now {
            return Err(EscrowError::ReleaseDateInPast.into());
        }
        if params.payer_id == params.receiver_id {
            return Err(EscrowError::SelfEscrow.into());
        }

        let escrow_fee = params
            .escrow_fee
            .unwrap_or_else(|| (params.amount * self.fee_rate).round_dp(2));

        let mut tx = EscrowTransaction {
            id: Uuid::new_v4(),
            subscription_id: params.subscription_id,
            payer_id: params.payer_id,
            receiver_id: params.receiver_id,
            amount: params.amount,
            escrow_fee,
            status: TransactionStatus::Pending,
            dispute_reason: None,
            created_at: now,
            release_date: params.release_date,
            released_at: None,
            refunded_at: None,
            version: 1,
        };

        let authorization = self
            .gateway
            .authorize(tx.payer_id, tx.total_charged())
            .await?;

        Self::validate_transition(tx.status, TransactionStatus::Held)?;
        tx.status = TransactionStatus::Held;

        let tx = self.store.insert_transaction(tx).await?;
        info!(
            transaction_id = %tx.id,
            authorization_id = %authorization.authorization_id,
            amount = %tx.amount,
            "escrow transaction held"
        );
        Ok(tx)
    }

    /// Release held funds to the receiver. Disallowed while an active
    /// dispute exists for the transaction.
    pub async fn release(&self, id: Uuid) -> AppResult<EscrowTransaction> {
        let tx = self.load(id).await?;

        if let Some(dispute) = self.store.active_dispute_for(id).await? {
            info!(transaction_id = %id, dispute_id = %dispute.id, "release blocked by dispute");
            return Err(EscrowError::ActiveDispute(id).into());
        }

        Self::validate_transition(tx.status, TransactionStatus::Released)?;

        let mut updated = tx;
        updated.status = TransactionStatus::Released;
        updated.released_at = Some(Utc::now());
        let updated = self.store.update_transaction(&updated).await?;

        self.events.publish(EscrowEvent::FundsReleased {
            transaction_id: updated.id,
            subscription_id: updated.subscription_id,
            receiver_id: updated.receiver_id,
            amount: updated.amount,
            released_at: updated.released_at.unwrap_or_else(Utc::now),
        });
        Ok(updated)
    }

    /// Refund held or disputed funds back to the payer
    pub async fn refund(&self, id: Uuid) -> AppResult<EscrowTransaction> {
        let tx = self.load(id).await?;
        Self::validate_transition(tx.status, TransactionStatus::Refunded)?;

        let mut updated = tx;
        updated.status = TransactionStatus::Refunded;
        updated.refunded_at = Some(Utc::now());
        let updated = self.store.update_transaction(&updated).await?;

        self.events.publish(EscrowEvent::FundsRefunded {
            transaction_id: updated.id,
            payer_id: updated.payer_id,
            amount: updated.amount,
            refunded_at: updated.refunded_at.unwrap_or_else(Utc::now),
        });
        Ok(updated)
    }

    /// Flag a held transaction as disputed, persisting the dispute case in
    /// the same store transaction as the status change.
    pub async fn flag_disputed(
        &self,
        id: Uuid,
        dispute: DisputeCase,
    ) -> AppResult<(EscrowTransaction, DisputeCase)> {
        let tx = self.load(id).await?;
        Self::validate_transition(tx.status, TransactionStatus::Disputed)?;

        let mut updated = tx;
        updated.status = TransactionStatus::Disputed;
        updated.dispute_reason = Some(dispute.reason.clone());
        let (updated, dispute) = self.store.open_dispute(&updated, dispute).await?;

        self.events.publish(EscrowEvent::DisputeOpened {
            dispute_id: dispute.id,
            transaction_id: updated.id,
            initiator_id: dispute.initiator_id,
            reason: dispute.reason.clone(),
        });
        Ok((updated, dispute))
    }

    async fn load(&self, id: Uuid) -> AppResult<EscrowTransaction> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(id).into())
    }
}
