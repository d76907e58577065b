pub mod machine;
pub mod payment;

pub use machine::{CreateTransaction, TransactionStateMachine};
pub use payment::{AutoApproveGateway, HttpPaymentGateway, PaymentGateway};
