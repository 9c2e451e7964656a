use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Transaction manager - hands out monotonically increasing transaction
/// ids and finalizes transactions, releasing their record locks.
pub struct TransactionManager {
    /// Next transaction ID to assign
    next_txn_id: AtomicU32,

    /// Lock manager used to release held locks at completion
    lock_manager: Arc<LockManager>,

    /// Active transactions map (txn_id -> Transaction)
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions
            .lock()
            .insert(txn_id, txn.clone());
        txn
    }

    /// Commit a transaction, releasing every lock it still holds.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        match txn.state() {
            TransactionState::Growing | TransactionState::Shrinking => {}
            TransactionState::Committed | TransactionState::Aborted => {
                return Err(TransactionError::NotActive(txn.id()));
            }
        }

        self.release_all_locks(txn);
        txn.set_state(TransactionState::Committed);
        self.finish(txn);
        Ok(())
    }

    /// Abort a transaction, releasing every lock it still holds. Higher
    /// layers are expected to roll back its changes first.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::NotActive(txn.id()));
        }

        self.release_all_locks(txn);
        txn.set_state(TransactionState::Aborted);
        self.finish(txn);
        Ok(())
    }

    /// Get a transaction by ID
    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Get all active transaction IDs
    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>) {
        // A deadlock victim's queue entries are already gone; unlock is
        // a set-cleanup no-op for those, so failures are ignored.
        for rid in txn.shared_rids() {
            let _ = self.lock_manager.unlock(txn, rid);
        }
        for rid in txn.exclusive_rids() {
            let _ = self.lock_manager.unlock(txn, rid);
        }
    }

    fn finish(&self, txn: &Arc<Transaction>) {
        self.lock_manager.forget_transaction(txn.id());
        self.active_transactions.lock().remove(&txn.id());
    }
}
