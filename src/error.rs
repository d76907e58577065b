use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::models::{DisputeStatus, TransactionStatus};

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Escrow error: {0}")]
    Escrow(#[from] EscrowError),

    #[error("Dispute error: {0}")]
    Dispute(#[from] DisputeError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Escrow transaction errors
#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("Transaction not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Transaction {0} has an active dispute")]
    ActiveDispute(Uuid),

    #[error("Concurrent modification of transaction {0}")]
    ConcurrentModification(Uuid),

    #[error("Release date must be after creation time")]
    ReleaseDateInPast,

    #[error("Payer and receiver must be different parties")]
    SelfEscrow,

    #[error("Amount must be nonnegative: {0}")]
    NegativeAmount(rust_decimal::Decimal),
}

/// Dispute workflow errors
#[derive(Error, Debug)]
pub enum DisputeError {
    #[error("Dispute not found: {0}")]
    NotFound(Uuid),

    #[error("Precondition failed: {0}")]
    InvalidPrecondition(String),

    #[error("Transaction {transaction_id} is no longer disputed (currently {current:?})")]
    TransactionNotDisputed {
        transaction_id: Uuid,
        current: TransactionStatus,
    },

    #[error("Dispute in invalid state: {current:?}, expected {expected}")]
    InvalidState {
        current: DisputeStatus,
        expected: String,
    },

    #[error("Concurrent modification of dispute {0}")]
    ConcurrentModification(Uuid),
}

/// Payment gateway errors
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Payment authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("Payment gateway unreachable: {0}")]
    GatewayUnreachable(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Payment(PaymentError::AuthorizationFailed(reason)) => (
                StatusCode::PAYMENT_REQUIRED,
                "PAYMENT_AUTHORIZATION_FAILED",
                format!("Payment authorization failed: {}", reason),
                None,
            ),
            AppError::Payment(PaymentError::GatewayUnreachable(reason)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PAYMENT_GATEWAY_UNREACHABLE",
                format!("Payment gateway unreachable: {}", reason),
                None,
            ),
            AppError::Escrow(EscrowError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "TRANSACTION_NOT_FOUND",
                format!("Transaction not found: {}", id),
                None,
            ),
            AppError::Escrow(EscrowError::InvalidStateTransition { from, to }) => (
                StatusCode::CONFLICT,
                "INVALID_STATE_TRANSITION",
                format!("Invalid state transition from {:?} to {:?}", from, to),
                Some(serde_json::json!({ "from": from, "to": to })),
            ),
            AppError::Escrow(EscrowError::ActiveDispute(id)) => (
                StatusCode::CONFLICT,
                "INVALID_STATE_TRANSITION",
                format!("Transaction {} has an active dispute", id),
                None,
            ),
            AppError::Escrow(EscrowError::ConcurrentModification(id)) => (
                StatusCode::CONFLICT,
                "CONCURRENT_MODIFICATION",
                format!("Transaction {} was modified concurrently", id),
                None,
            ),
            AppError::Escrow(
                e @ (EscrowError::ReleaseDateInPast
                | EscrowError::SelfEscrow
                | EscrowError::NegativeAmount(_)),
            ) => (
                StatusCode::BAD_REQUEST,
                "INVALID_TRANSACTION_REQUEST",
                e.to_string(),
                None,
            ),
            AppError::Dispute(DisputeError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "DISPUTE_NOT_FOUND",
                format!("Dispute not found: {}", id),
                None,
            ),
            AppError::Dispute(DisputeError::InvalidPrecondition(reason)) => (
                StatusCode::CONFLICT,
                "INVALID_PRECONDITION",
                format!("Precondition failed: {}", reason),
                None,
            ),
            AppError::Dispute(DisputeError::TransactionNotDisputed {
                transaction_id,
                current,
            }) => (
                StatusCode::CONFLICT,
                "TRANSACTION_NOT_DISPUTED",
                format!(
                    "Transaction {} is no longer disputed (currently {:?})",
                    transaction_id, current
                ),
                Some(serde_json::json!({ "current": current })),
            ),
            AppError::Dispute(DisputeError::InvalidState { current, expected }) => (
                StatusCode::CONFLICT,
                "DISPUTE_INVALID_STATE",
                format!("Dispute in state {:?}, expected {}", current, expected),
                None,
            ),
            AppError::Dispute(DisputeError::ConcurrentModification(id)) => (
                StatusCode::CONFLICT,
                "CONCURRENT_MODIFICATION",
                format!("Dispute {} was modified concurrently", id),
                None,
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg, None),
            AppError::PersistenceUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PERSISTENCE_UNAVAILABLE",
                "The ledger store is temporarily unavailable".to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::Payment(PaymentError::GatewayUnreachable(format!("{:?}", error)))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
