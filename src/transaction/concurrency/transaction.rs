// Represents an active database transaction and the record locks it
// holds.

use std::collections::HashSet;
use std::fmt;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::common::types::{Rid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase-locking transaction states.
///
/// A transaction is born `Growing`, moves to `Shrinking` on its first
/// lock release (with the read-committed shared-lock exception), and
/// ends `Committed` or `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why a transaction was aborted by the lock protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    UpgradeConflict,
    Deadlock,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            AbortReason::LockOnShrinking => "lock requested while shrinking",
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock requested under read uncommitted"
            }
            AbortReason::UpgradeConflict => "another transaction is already upgrading",
            AbortReason::Deadlock => "chosen as deadlock victim",
        };
        write!(f, "{}", reason)
    }
}

/// Errors that can occur during transaction processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {txn_id} aborted: {reason}")]
    Aborted { txn_id: TxnId, reason: AbortReason },

    #[error("Transaction {0} holds no lock on the record")]
    LockNotHeld(TxnId),

    #[error("Transaction {0} is no longer active")]
    NotActive(TxnId),
}

/// Transaction - represents an active database transaction
pub struct Transaction {
    /// Transaction ID
    id: TxnId,

    /// Current transaction state
    state: RwLock<TransactionState>,

    /// Isolation level for this transaction
    isolation_level: IsolationLevel,

    /// Records locked in shared mode
    shared_lock_set: Mutex<HashSet<Rid>>,

    /// Records locked in exclusive mode
    exclusive_lock_set: Mutex<HashSet<Rid>>,
}

impl Transaction {
    /// Create a new transaction with the given ID
    pub fn new(txn_id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id: txn_id,
            state: RwLock::new(TransactionState::Growing),
            isolation_level,
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
        }
    }

    /// Get transaction ID
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Get transaction state
    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    /// Set transaction state. Also called by the deadlock detector to
    /// cancel a victim, so waiters re-check it inside their wait loops.
    pub fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    /// Get transaction isolation level
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn holds_shared(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn holds_exclusive(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    /// Records currently locked in shared mode
    pub fn shared_rids(&self) -> Vec<Rid> {
        self.shared_lock_set.lock().iter().copied().collect()
    }

    /// Records currently locked in exclusive mode
    pub fn exclusive_rids(&self) -> Vec<Rid> {
        self.exclusive_lock_set.lock().iter().copied().collect()
    }

    pub(crate) fn add_shared(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn add_exclusive(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_shared(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub(crate) fn remove_exclusive(&self, rid: Rid) {
        self.exclusive_lock_set.lock().remove(&rid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_new() {
        let txn = Transaction::new(1, IsolationLevel::ReadCommitted);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation_level(), IsolationLevel::ReadCommitted);
        assert!(txn.shared_rids().is_empty());
        assert!(txn.exclusive_rids().is_empty());
    }

    #[test]
    fn test_lock_set_bookkeeping() {
        let txn = Transaction::new(2, IsolationLevel::RepeatableRead);
        let rid = Rid::new(3, 4);

        txn.add_shared(rid);
        assert!(txn.holds_shared(rid));
        assert!(!txn.holds_exclusive(rid));

        txn.remove_shared(rid);
        txn.add_exclusive(rid);
        assert!(!txn.holds_shared(rid));
        assert!(txn.holds_exclusive(rid));

        txn.remove_exclusive(rid);
        assert!(!txn.holds_exclusive(rid));
    }

    #[test]
    fn test_state_transitions() {
        let txn = Transaction::new(3, IsolationLevel::ReadCommitted);
        txn.set_state(TransactionState::Shrinking);
        assert_eq!(txn.state(), TransactionState::Shrinking);
        txn.set_state(TransactionState::Aborted);
        assert_eq!(txn.state(), TransactionState::Aborted);
    }
}
