use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::models::*;
use crate::{
    dispute::DisputeWorkflow,
    error::{AppError, AppResult},
    escrow::machine::{CreateTransaction, TransactionStateMachine},
    ledger::{
        models::{DisputeCase, EscrowTransaction, SubscriptionRollup, TransactionStatus},
        store::LedgerStore,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub machine: Arc<TransactionStateMachine>,
    pub disputes: Arc<DisputeWorkflow>,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Create an escrow transaction for a share join
/// POST /escrow/transactions
pub async fn create_transaction(
    State(state): State<AppState>,
    Json(request): Json<CreateTransactionRequest>,
) -> AppResult<(StatusCode, Json<EscrowTransaction>)> {
    check(&request)?;
    info!(
        subscription_id = %request.subscription_id,
        payer_id = %request.payer_id,
        amount = %request.amount,
        "creating escrow transaction"
    );

    let tx = state
        .machine
        .create(CreateTransaction {
            subscription_id: request.subscription_id,
            payer_id: request.payer_id,
            receiver_id: request.receiver_id,
            amount: request.amount,
            escrow_fee: request.escrow_fee,
            release_date: request.release_date,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(tx)))
}

/// GET /escrow/transactions?status=held
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<ListTransactionsQuery>,
) -> AppResult<Json<Vec<EscrowTransaction>>> {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(
            TransactionStatus::parse(raw)
                .ok_or_else(|| AppError::InvalidInput(format!("Unknown status: {}", raw)))?,
        ),
    };

    let txs = state.store.list_transactions(status).await?;
    Ok(Json(txs))
}

/// GET /escrow/transactions/{id}
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<EscrowTransaction>> {
    let tx = state
        .store
        .get_transaction(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", id)))?;
    Ok(Json(tx))
}

/// POST /escrow/transactions/{id}/release
pub async fn release_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<EscrowTransaction>> {
    let tx = state.machine.release(id).await?;
    Ok(Json(tx))
}

/// POST /escrow/transactions/{id}/refund
pub async fn refund_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<EscrowTransaction>> {
    let tx = state.machine.refund(id).await?;
    Ok(Json(tx))
}

/// POST /escrow/disputes
pub async fn open_dispute(
    State(state): State<AppState>,
    Json(request): Json<OpenDisputeRequest>,
) -> AppResult<(StatusCode, Json<DisputeCase>)> {
    check(&request)?;

    let (_, dispute) = state
        .disputes
        .open(
            request.transaction_id,
            request.initiator_id,
            request.reason,
            request.description,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(dispute)))
}

/// GET /escrow/disputes
pub async fn list_disputes(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<DisputeCase>>> {
    let disputes = state.store.list_disputes().await?;
    Ok(Json(disputes))
}

/// GET /escrow/disputes/{id}
pub async fn get_dispute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DisputeCase>> {
    let dispute = state
        .store
        .get_dispute(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Dispute {} not found", id)))?;
    Ok(Json(dispute))
}

/// POST /escrow/disputes/{id}/investigate
pub async fn investigate_dispute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DisputeCase>> {
    let dispute = state.disputes.investigate(id).await?;
    Ok(Json(dispute))
}

/// POST /escrow/disputes/{id}/resolve
pub async fn resolve_dispute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveDisputeRequest>,
) -> AppResult<Json<ResolutionResponse>> {
    check(&request)?;
    let (transaction, dispute) = state
        .disputes
        .resolve(id, request.outcome, request.note)
        .await?;
    Ok(Json(ResolutionResponse {
        transaction,
        dispute,
    }))
}

/// POST /escrow/disputes/{id}/close
pub async fn close_dispute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DisputeCase>> {
    let dispute = state.disputes.close(id).await?;
    Ok(Json(dispute))
}

/// GET /escrow/summary
pub async fn get_summary(State(state): State<AppState>) -> AppResult<Json<SummaryResponse>> {
    let summary = state.store.summary().await?;
    Ok(Json(summary.into()))
}

/// GET /escrow/subscriptions/{id}/summary
pub async fn get_subscription_summary(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> AppResult<Json<SubscriptionRollup>> {
    let rollup = state.store.subscription_rollup(subscription_id).await?;
    Ok(Json(rollup))
}
