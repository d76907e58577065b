use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::models::{
    DisputeCase, EscrowSummary, EscrowTransaction, SubscriptionRollup, TransactionStatus,
};

/// The ledger store - THE source of truth for all persisted state.
///
/// All mutating operations on a single transaction id are serialized through
/// optimistic versioning: writes carry the version they read, and a stale
/// version fails with `EscrowError::ConcurrentModification`. Components above
/// the store never cache records beyond a single operation.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_transaction(&self, tx: EscrowTransaction) -> AppResult<EscrowTransaction>;

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<EscrowTransaction>>;

    async fn list_transactions(
        &self,
        status: Option<TransactionStatus>,
    ) -> AppResult<Vec<EscrowTransaction>>;

    /// All `held` transactions whose release date is at or before `now`
    async fn due_for_release(&self, now: DateTime<Utc>) -> AppResult<Vec<EscrowTransaction>>;

    /// Version-checked write. Persists `tx` with its version bumped, failing
    /// with `ConcurrentModification` if `tx.version` is stale.
    async fn update_transaction(&self, tx: &EscrowTransaction) -> AppResult<EscrowTransaction>;

    /// Atomically persist the flagged transaction together with its new
    /// dispute case, so `disputed` status and the case never diverge.
    async fn open_dispute(
        &self,
        tx: &EscrowTransaction,
        dispute: DisputeCase,
    ) -> AppResult<(EscrowTransaction, DisputeCase)>;

    async fn get_dispute(&self, id: Uuid) -> AppResult<Option<DisputeCase>>;

    async fn list_disputes(&self) -> AppResult<Vec<DisputeCase>>;

    /// The active (open or investigating) dispute for a transaction, if any
    async fn active_dispute_for(&self, transaction_id: Uuid)
        -> AppResult<Option<DisputeCase>>;

    async fn update_dispute(&self, dispute: &DisputeCase) -> AppResult<DisputeCase>;

    /// Consistent snapshot of count and amount totals per status
    async fn summary(&self) -> AppResult<EscrowSummary>;

    async fn subscription_rollup(&self, subscription_id: Uuid) -> AppResult<SubscriptionRollup>;
}
