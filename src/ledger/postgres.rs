use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, AppResult, DisputeError, EscrowError};
use crate::ledger::models::{
    DisputeCase, EscrowSummary, EscrowTransaction, SubscriptionRollup, TransactionStatus,
};
use crate::ledger::store::LedgerStore;

const TRANSACTION_COLUMNS: &str = "id, subscription_id, payer_id, receiver_id, amount, \
     escrow_fee, status, dispute_reason, created_at, release_date, released_at, refunded_at, version";

const DISPUTE_COLUMNS: &str = "id, transaction_id, initiator_id, reason, description, status, \
     resolution, created_at, resolved_at, version";

/// Postgres-backed ledger store.
///
/// Per-id serialization comes from the `version` predicate on every UPDATE;
/// a write that lost the read-write race affects zero rows and surfaces as
/// `ConcurrentModification`. Reads are retried with bounded backoff on
/// connection-level failures; writes are not auto-retried since a retried
/// version check would misreport an applied write as a conflict.
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_transient(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

fn map_db_err(e: sqlx::Error) -> AppError {
    if is_transient(&e) {
        AppError::PersistenceUnavailable(e.to_string())
    } else {
        AppError::Database(e)
    }
}

type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, sqlx::Error>> + Send + 'a>>;

/// Bounded retry for read-only queries. Two retries with linear backoff;
/// after that the error surfaces as `PersistenceUnavailable` so callers
/// fail fast instead of hanging.
async fn with_read_retry<'a, T>(mut op: impl FnMut() -> StoreFuture<'a, T>) -> AppResult<T> {
    let mut attempt: u64 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) && attempt < 2 => {
                attempt += 1;
                warn!("transient store read failure (attempt {}): {}", attempt, e);
                tokio::time::sleep(Duration::from_millis(100 * attempt)).await;
            }
            Err(e) => return Err(map_db_err(e)),
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert_transaction(&self, tx: EscrowTransaction) -> AppResult<EscrowTransaction> {
        let sql = format!(
            "INSERT INTO escrow_transactions \
             (id, subscription_id, payer_id, receiver_id, amount, escrow_fee, status, \
              dispute_reason, created_at, release_date, released_at, refunded_at, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {TRANSACTION_COLUMNS}"
        );

        let inserted = sqlx::query_as::<_, EscrowTransaction>(&sql)
            .bind(tx.id)
            .bind(tx.subscription_id)
            .bind(tx.payer_id)
            .bind(tx.receiver_id)
            .bind(tx.amount)
            .bind(tx.escrow_fee)
            .bind(tx.status)
            .bind(&tx.dispute_reason)
            .bind(tx.created_at)
            .bind(tx.release_date)
            .bind(tx.released_at)
            .bind(tx.refunded_at)
            .bind(tx.version)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(inserted)
    }

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<EscrowTransaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM escrow_transactions WHERE id = $1");
        with_read_retry(|| {
            let sql = sql.clone();
            Box::pin(async move {
                sqlx::query_as::<_, EscrowTransaction>(&sql)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
            })
        })
        .await
    }

    async fn list_transactions(
        &self,
        status: Option<TransactionStatus>,
    ) -> AppResult<Vec<EscrowTransaction>> {
        let sql = match status {
            Some(_) => format!(
                "SELECT {TRANSACTION_COLUMNS} FROM escrow_transactions \
                 WHERE status = $1 ORDER BY created_at"
            ),
            None => format!(
                "SELECT {TRANSACTION_COLUMNS} FROM escrow_transactions ORDER BY created_at"
            ),
        };
        with_read_retry(|| {
            let sql = sql.clone();
            Box::pin(async move {
                let mut query = sqlx::query_as::<_, EscrowTransaction>(&sql);
                if let Some(s) = status {
                    query = query.bind(s);
                }
                query.fetch_all(&self.pool).await
            })
        })
        .await
    }

    async fn due_for_release(&self, now: DateTime<Utc>) -> AppResult<Vec<EscrowTransaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM escrow_transactions \
             WHERE status = $1 AND release_date <= $2 ORDER BY release_date"
        );
        with_read_retry(|| {
            let sql = sql.clone();
            Box::pin(async move {
                sqlx::query_as::<_, EscrowTransaction>(&sql)
                    .bind(TransactionStatus::Held)
                    .bind(now)
                    .fetch_all(&self.pool)
                    .await
            })
        })
        .await
    }

    async fn update_transaction(&self, tx: &EscrowTransaction) -> AppResult<EscrowTransaction> {
        let sql = format!(
            "UPDATE escrow_transactions \
             SET status = $2, dispute_reason = $3, release_date = $4, \
                 released_at = $5, refunded_at = $6, version = version + 1 \
             WHERE id = $1 AND version = $7 \
             RETURNING {TRANSACTION_COLUMNS}"
        );

        let updated = sqlx::query_as::<_, EscrowTransaction>(&sql)
            .bind(tx.id)
            .bind(tx.status)
            .bind(&tx.dispute_reason)
            .bind(tx.release_date)
            .bind(tx.released_at)
            .bind(tx.refunded_at)
            .bind(tx.version)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;

        match updated {
            Some(row) => Ok(row),
            // Zero rows: either the id is gone or the version is stale
            None => match self.get_transaction(tx.id).await? {
                Some(_) => Err(EscrowError::ConcurrentModification(tx.id).into()),
                None => Err(EscrowError::NotFound(tx.id).into()),
            },
        }
    }

    async fn open_dispute(
        &self,
        tx: &EscrowTransaction,
        dispute: DisputeCase,
    ) -> AppResult<(EscrowTransaction, DisputeCase)> {
        let mut db_tx = self.pool.begin().await.map_err(map_db_err)?;

        let active: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM dispute_cases \
             WHERE transaction_id = $1 AND status IN ('open', 'investigating') \
             FOR UPDATE",
        )
        .bind(tx.id)
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(map_db_err)?;

        if active.is_some() {
            return Err(DisputeError::InvalidPrecondition(format!(
                "transaction {} already has an active dispute",
                tx.id
            ))
            .into());
        }

        let update_sql = format!(
            "UPDATE escrow_transactions \
             SET status = $2, dispute_reason = $3, version = version + 1 \
             WHERE id = $1 AND version = $4 \
             RETURNING {TRANSACTION_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, EscrowTransaction>(&update_sql)
            .bind(tx.id)
            .bind(tx.status)
            .bind(&tx.dispute_reason)
            .bind(tx.version)
            .fetch_optional(&mut *db_tx)
            .await
            .map_err(map_db_err)?
            .ok_or(EscrowError::ConcurrentModification(tx.id))?;

        let insert_sql = format!(
            "INSERT INTO dispute_cases \
             (id, transaction_id, initiator_id, reason, description, status, resolution, \
              created_at, resolved_at, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {DISPUTE_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, DisputeCase>(&insert_sql)
            .bind(dispute.id)
            .bind(dispute.transaction_id)
            .bind(dispute.initiator_id)
            .bind(&dispute.reason)
            .bind(&dispute.description)
            .bind(dispute.status)
            .bind(&dispute.resolution)
            .bind(dispute.created_at)
            .bind(dispute.resolved_at)
            .bind(dispute.version)
            .fetch_one(&mut *db_tx)
            .await
            .map_err(map_db_err)?;

        db_tx.commit().await.map_err(map_db_err)?;
        Ok((updated, inserted))
    }

    async fn get_dispute(&self, id: Uuid) -> AppResult<Option<DisputeCase>> {
        let sql = format!("SELECT {DISPUTE_COLUMNS} FROM dispute_cases WHERE id = $1");
        with_read_retry(|| {
            let sql = sql.clone();
            Box::pin(async move {
                sqlx::query_as::<_, DisputeCase>(&sql)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
            })
        })
        .await
    }

    async fn list_disputes(&self) -> AppResult<Vec<DisputeCase>> {
        let sql = format!("SELECT {DISPUTE_COLUMNS} FROM dispute_cases ORDER BY created_at");
        with_read_retry(|| {
            let sql = sql.clone();
            Box::pin(async move {
                sqlx::query_as::<_, DisputeCase>(&sql)
                    .fetch_all(&self.pool)
                    .await
            })
        })
        .await
    }

    async fn active_dispute_for(
        &self,
        transaction_id: Uuid,
    ) -> AppResult<Option<DisputeCase>> {
        let sql = format!(
            "SELECT {DISPUTE_COLUMNS} FROM dispute_cases \
             WHERE transaction_id = $1 AND status IN ('open', 'investigating') \
             LIMIT 1"
        );
        with_read_retry(|| {
            let sql = sql.clone();
            Box::pin(async move {
                sqlx::query_as::<_, DisputeCase>(&sql)
                    .bind(transaction_id)
                    .fetch_optional(&self.pool)
                    .await
            })
        })
        .await
    }

    async fn update_dispute(&self, dispute: &DisputeCase) -> AppResult<DisputeCase> {
        let sql = format!(
            "UPDATE dispute_cases \
             SET status = $2, resolution = $3, resolved_at = $4, version = version + 1 \
             WHERE id = $1 AND version = $5 \
             RETURNING {DISPUTE_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, DisputeCase>(&sql)
            .bind(dispute.id)
            .bind(dispute.status)
            .bind(&dispute.resolution)
            .bind(dispute.resolved_at)
            .bind(dispute.version)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;

        match updated {
            Some(row) => Ok(row),
            // Zero rows: either the id is gone or the version is stale
            None => match self.get_dispute(dispute.id).await? {
                Some(_) => Err(DisputeError::ConcurrentModification(dispute.id).into()),
                None => Err(DisputeError::NotFound(dispute.id).into()),
            },
        }
    }

    async fn summary(&self) -> AppResult<EscrowSummary> {
        // Single statement, so the per-status rows are one consistent snapshot
        let rows: Vec<(TransactionStatus, i64, Decimal)> = with_read_retry(|| {
            Box::pin(async move {
                sqlx::query_as(
                    "SELECT status, COUNT(*), COALESCE(SUM(amount), 0) \
                     FROM escrow_transactions GROUP BY status",
                )
                .fetch_all(&self.pool)
                .await
            })
        })
        .await?;

        let mut summary = EscrowSummary::default();
        for (status, count, amount) in rows {
            let totals = summary.totals_mut(status);
            totals.count = count;
            totals.amount = amount;
        }
        Ok(summary)
    }

    async fn subscription_rollup(&self, subscription_id: Uuid) -> AppResult<SubscriptionRollup> {
        let rows: Vec<(TransactionStatus, i64, Decimal)> = with_read_retry(|| {
            Box::pin(async move {
                sqlx::query_as(
                    "SELECT status, COUNT(*), COALESCE(SUM(amount), 0) \
                     FROM escrow_transactions WHERE subscription_id = $1 GROUP BY status",
                )
                .bind(subscription_id)
                .fetch_all(&self.pool)
                .await
            })
        })
        .await?;

        let mut summary = EscrowSummary::default();
        let mut transaction_count = 0;
        for (status, count, amount) in rows {
            let totals = summary.totals_mut(status);
            totals.count = count;
            totals.amount = amount;
            transaction_count += count;
        }
        Ok(SubscriptionRollup {
            subscription_id,
            transaction_count,
            summary,
        })
    }
}
