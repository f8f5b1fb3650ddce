//! Database repositories for each table.

pub mod config;
pub mod transactions;

pub use config::ConfigRepo;
pub use transactions::TransactionRepo;
