use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

/// Escrow transaction status
///
/// Critical INVARIANT: `Released` and `Refunded` are terminal - no
/// transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Held,
    Released,
    Disputed,
    Refunded,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Held => "held",
            TransactionStatus::Released => "released",
            TransactionStatus::Disputed => "disputed",
            TransactionStatus::Refunded => "refunded",
        }
    }

    /// Return all statuses
    pub fn all() -> Vec<TransactionStatus> {
        vec![
            TransactionStatus::Pending,
            TransactionStatus::Held,
            TransactionStatus::Released,
            TransactionStatus::Disputed,
            TransactionStatus::Refunded,
        ]
    }

    pub fn parse(s: &str) -> Option<TransactionStatus> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "held" => Some(TransactionStatus::Held),
            "released" => Some(TransactionStatus::Released),
            "disputed" => Some(TransactionStatus::Disputed),
            "refunded" => Some(TransactionStatus::Refunded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Released | TransactionStatus::Refunded)
    }
}

/// Dispute case status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "dispute_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DisputeStatus {
    Open,
    Investigating,
    Resolved,
    Closed,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "open",
            DisputeStatus::Investigating => "investigating",
            DisputeStatus::Resolved => "resolved",
            DisputeStatus::Closed => "closed",
        }
    }

    /// An active dispute blocks release of its transaction
    pub fn is_active(&self) -> bool {
        matches!(self, DisputeStatus::Open | DisputeStatus::Investigating)
    }
}

/// Outcome a resolver picks for a dispute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeOutcome {
    Release,
    Refund,
}

/// Escrow transaction entity - one payment held for a subscription share
///
/// `release_date` is fixed at creation and never moved; only an explicit
/// dispute resolution changes the path to release or refund.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EscrowTransaction {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub payer_id: Uuid,
    pub receiver_id: Uuid,

    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// Held in addition to `amount`, not deducted from it
    #[serde(with = "rust_decimal::serde::float")]
    pub escrow_fee: Decimal,

    pub status: TransactionStatus,
    pub dispute_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub release_date: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency token, bumped by the store on every write
    pub version: i64,
}

impl EscrowTransaction {
    /// Total held on behalf of the payer
    pub fn total_charged(&self) -> Decimal {
        self.amount + self.escrow_fee
    }

    /// Whether the scheduler may release this record at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TransactionStatus::Held && self.release_date <= now
    }
}

/// Dispute case entity - at most one active case per transaction
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DisputeCase {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub initiator_id: Uuid,
    pub reason: String,
    pub description: String,
    pub status: DisputeStatus,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency token, bumped by the store on every write
    pub version: i64,
}

impl DisputeCase {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Count and amount total for one transaction status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTotals {
    pub count: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

/// Aggregate view over the ledger, consumed by the dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowSummary {
    pub pending: StatusTotals,
    pub held: StatusTotals,
    pub released: StatusTotals,
    pub disputed: StatusTotals,
    pub refunded: StatusTotals,
}

impl EscrowSummary {
    pub fn totals_mut(&mut self, status: TransactionStatus) -> &mut StatusTotals {
        match status {
            TransactionStatus::Pending => &mut self.pending,
            TransactionStatus::Held => &mut self.held,
            TransactionStatus::Released => &mut self.released,
            TransactionStatus::Disputed => &mut self.disputed,
            TransactionStatus::Refunded => &mut self.refunded,
        }
    }

    pub fn totals(&self, status: TransactionStatus) -> StatusTotals {
        match status {
            TransactionStatus::Pending => self.pending,
            TransactionStatus::Held => self.held,
            TransactionStatus::Released => self.released,
            TransactionStatus::Disputed => self.disputed,
            TransactionStatus::Refunded => self.refunded,
        }
    }

    pub fn record(&mut self, status: TransactionStatus, amount: Decimal) {
        let totals = self.totals_mut(status);
        totals.count += 1;
        totals.amount += amount;
    }

    pub fn unrecord(&mut self, status: TransactionStatus, amount: Decimal) {
        let totals = self.totals_mut(status);
        totals.count -= 1;
        totals.amount -= amount;
    }

    /// Money currently or previously moving through escrow (the UI's
    /// "total volume" card: held + released + disputed)
    pub fn total_volume(&self) -> Decimal {
        self.held.amount + self.released.amount + self.disputed.amount
    }
}

/// Per-subscription aggregate rollup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRollup {
    pub subscription_id: Uuid,
    pub transaction_count: i64,
    pub summary: EscrowSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn terminal_statuses() {
        assert!(TransactionStatus::Released.is_terminal());
        assert!(TransactionStatus::Refunded.is_terminal());
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(!TransactionStatus::Held.is_terminal());
        assert!(!TransactionStatus::Disputed.is_terminal());
    }

    #[test]
    fn active_dispute_statuses() {
        assert!(DisputeStatus::Open.is_active());
        assert!(DisputeStatus::Investigating.is_active());
        assert!(!DisputeStatus::Resolved.is_active());
        assert!(!DisputeStatus::Closed.is_active());
    }

    #[test]
    fn summary_record_and_unrecord() {
        let mut summary = EscrowSummary::default();
        summary.record(TransactionStatus::Held, dec!(3.99));
        summary.record(TransactionStatus::Held, dec!(2.83));
        assert_eq!(summary.held.count, 2);
        assert_eq!(summary.held.amount, dec!(6.82));

        summary.unrecord(TransactionStatus::Held, dec!(2.83));
        summary.record(TransactionStatus::Disputed, dec!(2.83));
        assert_eq!(summary.held.count, 1);
        assert_eq!(summary.held.amount, dec!(3.99));
        assert_eq!(summary.disputed.amount, dec!(2.83));
        assert_eq!(summary.total_volume(), dec!(6.82));
    }

    #[test]
    fn status_round_trip() {
        for status in TransactionStatus::all() {
            assert_eq!(TransactionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TransactionStatus::parse("settled"), None);
    }
}
