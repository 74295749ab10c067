//! AT mode branch transactions: row images, lock keys, undo logs, and the
//! statement filter that registers branches with the transaction coordinator.

pub mod config;
pub mod coordinator;
pub mod executor;
pub mod filter;
pub mod image;
pub mod lock;
pub mod retry;
pub mod undo;

pub use filter::{DistributedTransactionFactory, DistributedTransactionFilter, MYSQL_FILTER_NAME};
