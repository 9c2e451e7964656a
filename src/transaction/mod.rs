pub mod concurrency;

pub use concurrency::{
    AbortReason, IsolationLevel, LockManager, LockManagerConfig, LockMode, Transaction,
    TransactionError, TransactionManager, TransactionState,
};
