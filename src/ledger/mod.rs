pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::MemoryLedgerStore;
pub use models::{
    DisputeCase, DisputeOutcome, DisputeStatus, EscrowSummary, EscrowTransaction, StatusTotals,
    SubscriptionRollup, TransactionStatus,
};
pub use postgres::PgLedgerStore;
pub use store::LedgerStore;
