use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::error::AppError;
use crate::ledger::models::{DisputeCase, DisputeOutcome, EscrowSummary, EscrowTransaction};

fn nonnegative(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount < Decimal::ZERO {
        return Err(ValidationError::new("nonnegative"));
    }
    Ok(())
}

/// POST /escrow/transactions
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTransactionRequest {
    pub subscription_id: Uuid,
    pub payer_id: Uuid,
    pub receiver_id: Uuid,
    #[validate(custom = "nonnegative")]
    pub amount: Decimal,
    /// Derived from the configured fee rate when absent
    #[validate(custom = "nonnegative")]
    pub escrow_fee: Option<Decimal>,
    pub release_date: DateTime<Utc>,
}

/// GET /escrow/transactions query string
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    pub status: Option<String>,
}

/// POST /escrow/disputes
#[derive(Debug, Deserialize, Validate)]
pub struct OpenDisputeRequest {
    pub transaction_id: Uuid,
    pub initiator_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub reason: String,
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub description: String,
}

/// POST /escrow/disputes/{id}/resolve
#[derive(Debug, Deserialize, Validate)]
pub struct ResolveDisputeRequest {
    pub outcome: DisputeOutcome,
    #[validate(length(min = 1, max = 2000))]
    pub note: String,
}

/// Resolution touches both records, so both come back
#[derive(Debug, Serialize)]
pub struct ResolutionResponse {
    pub transaction: EscrowTransaction,
    pub dispute: DisputeCase,
}

/// GET /escrow/summary
#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    #[serde(flatten)]
    pub summary: EscrowSummary,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_volume: Decimal,
}

impl From<EscrowSummary> for SummaryResponse {
    fn from(summary: EscrowSummary) -> Self {
        Self {
            total_volume: summary.total_volume(),
            summary,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Flatten validator's field errors into one InvalidInput message
pub fn check<T: Validate>(request: &T) -> Result<(), AppError> {
    request.validate().map_err(|e| {
        let errors = e
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let codes: Vec<String> = errors.iter().map(|e| e.code.to_string()).collect();
                format!("{}: {}", field, codes.join(", "))
            })
            .collect::<Vec<String>>()
            .join("; ");
        AppError::InvalidInput(format!("Validation failed: {}", errors))
    })
}
