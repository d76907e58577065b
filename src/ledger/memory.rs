use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppResult, DisputeError, EscrowError};
use crate::ledger::models::{
    DisputeCase, EscrowSummary, EscrowTransaction, SubscriptionRollup, TransactionStatus,
};
use crate::ledger::store::LedgerStore;

#[derive(Default)]
struct Inner {
    transactions: HashMap<Uuid, EscrowTransaction>,
    disputes: HashMap<Uuid, DisputeCase>,
    /// Maintained inside the same write-lock scope as every state change,
    /// so summary reads never pay a scan and never see a half-applied move.
    summary: EscrowSummary,
}

/// In-memory ledger store. Backs tests and DB-less deployments; the single
/// `RwLock` makes every mutation a serialization point, and version checks
/// mirror the Postgres backend so races surface the same way.
pub struct MemoryLedgerStore {
    inner: RwLock<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn apply_update(&mut self, tx: &EscrowTransaction) -> AppResult<EscrowTransaction> {
        let current = self
            .transactions
            .get(&tx.id)
            .ok_or(EscrowError::NotFound(tx.id))?;

        if current.version != tx.version {
            return Err(EscrowError::ConcurrentModification(tx.id).into());
        }

        self.summary.unrecord(current.status, current.amount);
        self.summary.record(tx.status, tx.amount);

        let mut updated = tx.clone();
        updated.version += 1;
        self.transactions.insert(updated.id, updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_transaction(&self, tx: EscrowTransaction) -> AppResult<EscrowTransaction> {
        let mut inner = self.inner.write().await;
        inner.summary.record(tx.status, tx.amount);
        inner.transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<EscrowTransaction>> {
        let inner = self.inner.read().await;
        Ok(inner.transactions.get(&id).cloned())
    }

    async fn list_transactions(
        &self,
        status: Option<TransactionStatus>,
    ) -> AppResult<Vec<EscrowTransaction>> {
        let inner = self.inner.read().await;
        let mut txs: Vec<_> = inner
            .transactions
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        txs.sort_by_key(|t| t.created_at);
        Ok(txs)
    }

    async fn due_for_release(&self, now: DateTime<Utc>) -> AppResult<Vec<EscrowTransaction>> {
        let inner = self.inner.read().await;
        let mut due: Vec<_> = inner
            .transactions
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|t| t.release_date);
        Ok(due)
    }

    async fn update_transaction(&self, tx: &EscrowTransaction) -> AppResult<EscrowTransaction> {
        let mut inner = self.inner.write().await;
        inner.apply_update(tx)
    }

    async fn open_dispute(
        &self,
        tx: &EscrowTransaction,
        dispute: DisputeCase,
    ) -> AppResult<(EscrowTransaction, DisputeCase)> {
        let mut inner = self.inner.write().await;

        // Re-check under the write lock: one active case per transaction.
        if inner
            .disputes
            .values()
            .any(|d| d.transaction_id == tx.id && d.is_active())
        {
            return Err(DisputeError::InvalidPrecondition(format!(
                "transaction {} already has an active dispute",
                tx.id
            ))
            .into());
        }

        let updated = inner.apply_update(tx)?;
        inner.disputes.insert(dispute.id, dispute.clone());
        Ok((updated, dispute))
    }

    async fn get_dispute(&self, id: Uuid) -> AppResult<Option<DisputeCase>> {
        let inner = self.inner.read().await;
        Ok(inner.disputes.get(&id).cloned())
    }

    async fn list_disputes(&self) -> AppResult<Vec<DisputeCase>> {
        let inner = self.inner.read().await;
        let mut disputes: Vec<_> = inner.disputes.values().cloned().collect();
        disputes.sort_by_key(|d| d.created_at);
        Ok(disputes)
    }

    async fn active_dispute_for(
        &self,
        transaction_id: Uuid,
    ) -> AppResult<Option<DisputeCase>> {
        let inner = self.inner.read().await;
        Ok(inner
            .disputes
            .values()
            .find(|d| d.transaction_id == transaction_id && d.is_active())
            .cloned())
    }

    async fn update_dispute(&self, dispute: &DisputeCase) -> AppResult<DisputeCase> {
        let mut inner = self.inner.write().await;
        let current = inner
            .disputes
            .get(&dispute.id)
            .ok_or(DisputeError::NotFound(dispute.id))?;

        // Same discipline as transactions: a stale version never clobbers
        if current.version != dispute.version {
            return Err(DisputeError::ConcurrentModification(dispute.id).into());
        }

        let mut updated = dispute.clone();
        updated.version += 1;
        inner.disputes.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn summary(&self) -> AppResult<EscrowSummary> {
        let inner = self.inner.read().await;
        Ok(inner.summary)
    }

    async fn subscription_rollup(&self, subscription_id: Uuid) -> AppResult<SubscriptionRollup> {
        let inner = self.inner.read().await;
        let mut summary = EscrowSummary::default();
        let mut transaction_count = 0;
        for tx in inner
            .transactions
            .values()
            .filter(|t| t.subscription_id == subscription_id)
        {
            summary.record(tx.status, tx.amount);
            transaction_count += 1;
        }
        Ok(SubscriptionRollup {
            subscription_id,
            transaction_count,
            summary,
        })
    }
}
