pub mod api;
pub mod bootstrap;
pub mod config;
pub mod dispute;
pub mod error;
pub mod escrow;
pub mod events;
pub mod ledger;
pub mod middleware;
pub mod scheduler;
pub mod server;
