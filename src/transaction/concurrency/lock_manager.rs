use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};
use crate::transaction::concurrency::wait_for_graph::WaitForGraph;

/// Lock request modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// One entry in a per-record request queue, in FIFO arrival order.
#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// Per-record queue state plus the condition its waiters sleep on.
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    shared_lock_count: usize,
    exclusive_granted: bool,
    /// Transaction currently promoting its shared lock in place, if any.
    upgrading: Option<TxnId>,
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            shared_lock_count: 0,
            exclusive_granted: false,
            upgrading: None,
            cv: Arc::new(Condvar::new()),
        }
    }

    fn position_of(&self, txn_id: TxnId) -> Option<usize> {
        self.requests.iter().position(|r| r.txn_id == txn_id)
    }

    /// Drop a transaction's request, fixing grant bookkeeping if it was
    /// already granted. Returns whether anything was removed.
    fn remove_request(&mut self, txn_id: TxnId) -> bool {
        let Some(pos) = self.position_of(txn_id) else {
            return false;
        };
        let request = match self.requests.remove(pos) {
            Some(request) => request,
            None => return false,
        };
        if request.granted {
            match request.mode {
                LockMode::Shared => self.shared_lock_count -= 1,
                LockMode::Exclusive => self.exclusive_granted = false,
            }
        }
        if self.upgrading == Some(txn_id) {
            self.upgrading = None;
        }
        true
    }

    /// A shared request may be granted once no exclusive request,
    /// granted or still waiting, sits ahead of it: readers never barge
    /// past writers.
    fn shared_grantable_at(&self, pos: usize) -> bool {
        self.requests
            .iter()
            .take(pos)
            .all(|r| r.mode != LockMode::Exclusive)
    }

    /// An exclusive request may be granted once the record is entirely
    /// unlocked and the request is the frontmost waiter.
    fn exclusive_grantable_at(&self, pos: usize) -> bool {
        self.shared_lock_count == 0
            && !self.exclusive_granted
            && self
                .requests
                .iter()
                .position(|r| !r.granted)
                .map_or(false, |first_waiting| first_waiting == pos)
    }
}

struct LockTable {
    queues: HashMap<Rid, LockRequestQueue>,
    /// Transactions seen by this manager, so the deadlock detector can
    /// flip a victim's state.
    txns: HashMap<TxnId, Arc<Transaction>>,
}

/// Lock manager tuning knobs.
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// How often the background detector scans for wait cycles.
    pub detection_interval: Duration,
    pub enable_deadlock_detection: bool,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            detection_interval: Duration::from_millis(50),
            enable_deadlock_detection: true,
        }
    }
}

/// Record-granularity reader/writer lock manager enforcing strict-ish
/// two-phase locking.
///
/// Grants follow FIFO queue order modulo mode compatibility, upgrades
/// promote their existing entry in place, and a background thread
/// periodically breaks wait-for cycles by aborting the youngest
/// (highest id) transaction on the cycle.
pub struct LockManager {
    table: Mutex<LockTable>,
    config: LockManagerConfig,
}

impl LockManager {
    /// Create the manager and, if enabled, spawn the cycle-detection
    /// thread. The thread holds only a weak reference and exits on its
    /// own once the manager is dropped.
    pub fn new(config: LockManagerConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            table: Mutex::new(LockTable {
                queues: HashMap::new(),
                txns: HashMap::new(),
            }),
            config,
        });

        if manager.config.enable_deadlock_detection {
            let weak = Arc::downgrade(&manager);
            let interval = manager.config.detection_interval;
            thread::spawn(move || loop {
                thread::sleep(interval);
                match weak.upgrade() {
                    Some(lock_manager) => lock_manager.run_deadlock_detection(),
                    None => break,
                }
            });
        }

        manager
    }

    /// Acquire a shared lock on a record, blocking until compatible.
    pub fn lock_shared(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<(), TransactionError> {
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::LockSharedOnReadUncommitted,
            });
        }
        self.check_can_acquire(txn)?;
        if txn.holds_shared(rid) || txn.holds_exclusive(rid) {
            return Ok(());
        }

        let mut table = self.table.lock();
        table.txns.insert(txn.id(), txn.clone());
        let cv = {
            let queue = table.queues.entry(rid).or_insert_with(LockRequestQueue::new);
            queue.requests.push_back(LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Shared,
                granted: false,
            });
            queue.cv.clone()
        };

        loop {
            if txn.state() == TransactionState::Aborted {
                return self.abandon_wait(&mut table, txn, rid);
            }
            let granted = {
                let queue = match table.queues.get_mut(&rid) {
                    Some(queue) => queue,
                    None => return self.abandon_wait(&mut table, txn, rid),
                };
                match queue.position_of(txn.id()) {
                    Some(pos) if queue.shared_grantable_at(pos) => {
                        queue.requests[pos].granted = true;
                        queue.shared_lock_count += 1;
                        true
                    }
                    Some(_) => false,
                    None => return self.abandon_wait(&mut table, txn, rid),
                }
            };
            if granted {
                txn.add_shared(rid);
                return Ok(());
            }
            cv.wait(&mut table);
        }
    }

    /// Acquire an exclusive lock on a record, blocking until the record
    /// is free and the request is frontmost.
    pub fn lock_exclusive(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<(), TransactionError> {
        self.check_can_acquire(txn)?;
        if txn.holds_exclusive(rid) {
            return Ok(());
        }
        // A held shared lock must be promoted in place, not re-queued.
        if txn.holds_shared(rid) {
            return self.lock_upgrade(txn, rid);
        }

        let mut table = self.table.lock();
        table.txns.insert(txn.id(), txn.clone());
        let cv = {
            let queue = table.queues.entry(rid).or_insert_with(LockRequestQueue::new);
            queue.requests.push_back(LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Exclusive,
                granted: false,
            });
            queue.cv.clone()
        };

        loop {
            if txn.state() == TransactionState::Aborted {
                return self.abandon_wait(&mut table, txn, rid);
            }
            let granted = {
                let queue = match table.queues.get_mut(&rid) {
                    Some(queue) => queue,
                    None => return self.abandon_wait(&mut table, txn, rid),
                };
                match queue.position_of(txn.id()) {
                    Some(pos) if queue.exclusive_grantable_at(pos) => {
                        queue.requests[pos].granted = true;
                        queue.exclusive_granted = true;
                        true
                    }
                    Some(_) => false,
                    None => return self.abandon_wait(&mut table, txn, rid),
                }
            };
            if granted {
                txn.add_exclusive(rid);
                return Ok(());
            }
            cv.wait(&mut table);
        }
    }

    /// Promote an already held shared lock to exclusive. The existing
    /// queue entry is flipped in place rather than re-queued at the
    /// tail; only one transaction may be upgrading per record.
    pub fn lock_upgrade(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<(), TransactionError> {
        self.check_can_acquire(txn)?;
        if !txn.holds_shared(rid) {
            return Err(TransactionError::LockNotHeld(txn.id()));
        }

        let mut table = self.table.lock();
        let cv = {
            let queue = table
                .queues
                .get_mut(&rid)
                .ok_or(TransactionError::LockNotHeld(txn.id()))?;

            if queue.upgrading.is_some() {
                txn.set_state(TransactionState::Aborted);
                return Err(TransactionError::Aborted {
                    txn_id: txn.id(),
                    reason: AbortReason::UpgradeConflict,
                });
            }

            let pos = queue
                .position_of(txn.id())
                .ok_or(TransactionError::LockNotHeld(txn.id()))?;
            queue.requests[pos].mode = LockMode::Exclusive;
            queue.requests[pos].granted = false;
            queue.shared_lock_count -= 1;
            queue.upgrading = Some(txn.id());
            txn.remove_shared(rid);
            queue.cv.clone()
        };

        loop {
            if txn.state() == TransactionState::Aborted {
                return self.abandon_wait(&mut table, txn, rid);
            }
            let granted = {
                let queue = match table.queues.get_mut(&rid) {
                    Some(queue) => queue,
                    None => return self.abandon_wait(&mut table, txn, rid),
                };
                if queue.shared_lock_count == 0 && !queue.exclusive_granted {
                    match queue.position_of(txn.id()) {
                        Some(pos) => {
                            queue.requests[pos].granted = true;
                            queue.exclusive_granted = true;
                            queue.upgrading = None;
                            true
                        }
                        None => return self.abandon_wait(&mut table, txn, rid),
                    }
                } else {
                    false
                }
            };
            if granted {
                txn.add_exclusive(rid);
                return Ok(());
            }
            cv.wait(&mut table);
        }
    }

    /// Release a lock held on a record.
    ///
    /// Moves the transaction to `Shrinking`, except when a shared lock
    /// is released under read committed, where early release is part of
    /// the protocol.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<(), TransactionError> {
        let held_shared = txn.holds_shared(rid);
        let held_exclusive = txn.holds_exclusive(rid);
        if !held_shared && !held_exclusive {
            return Err(TransactionError::LockNotHeld(txn.id()));
        }
        txn.remove_shared(rid);
        txn.remove_exclusive(rid);

        let mut table = self.table.lock();
        if let Some(queue) = table.queues.get_mut(&rid) {
            if queue.remove_request(txn.id()) {
                queue.cv.notify_all();
            }
        }

        let early_shared_release =
            held_shared && txn.isolation_level() == IsolationLevel::ReadCommitted;
        if txn.state() == TransactionState::Growing && !early_shared_release {
            txn.set_state(TransactionState::Shrinking);
        }

        Ok(())
    }

    /// Drop a transaction from the registry once it has finished.
    pub fn forget_transaction(&self, txn_id: TxnId) {
        self.table.lock().txns.remove(&txn_id);
    }

    /// One detection pass: build the wait-for graph, abort the youngest
    /// transaction of each cycle until none remain.
    pub fn run_deadlock_detection(&self) {
        let mut table = self.table.lock();

        loop {
            let graph = Self::build_wait_for_graph(&table);
            if graph.is_empty() {
                break;
            }
            let Some(cycle) = graph.find_cycle() else {
                break;
            };
            let Some(&victim_id) = cycle.iter().max() else {
                break;
            };
            warn!(
                "deadlock cycle {:?} detected; aborting youngest txn {}",
                cycle, victim_id
            );

            if let Some(victim) = table.txns.get(&victim_id).cloned() {
                victim.set_state(TransactionState::Aborted);
            }

            // Remove the victim everywhere and wake each affected queue
            // so granted holders re-evaluate and waiters notice the
            // abort.
            for queue in table.queues.values_mut() {
                if queue.remove_request(victim_id) {
                    queue.cv.notify_all();
                }
            }
        }
    }

    fn build_wait_for_graph(table: &LockTable) -> WaitForGraph {
        let mut graph = WaitForGraph::new();
        for queue in table.queues.values() {
            let holders: Vec<TxnId> = queue
                .requests
                .iter()
                .filter(|r| r.granted)
                .map(|r| r.txn_id)
                .collect();
            for waiter in queue.requests.iter().filter(|r| !r.granted) {
                for &holder in &holders {
                    if holder != waiter.txn_id {
                        graph.add_edge(waiter.txn_id, holder);
                    }
                }
            }
        }
        graph
    }

    /// A transaction may only acquire locks while `Growing`; asking
    /// while `Shrinking` is a protocol violation that aborts it.
    fn check_can_acquire(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        match txn.state() {
            TransactionState::Growing => Ok(()),
            TransactionState::Shrinking => {
                txn.set_state(TransactionState::Aborted);
                Err(TransactionError::Aborted {
                    txn_id: txn.id(),
                    reason: AbortReason::LockOnShrinking,
                })
            }
            TransactionState::Committed | TransactionState::Aborted => {
                Err(TransactionError::NotActive(txn.id()))
            }
        }
    }

    /// Unwind a cancelled wait: drop our request (the detector may have
    /// done it already), wake anyone we were blocking, and surface the
    /// abort.
    fn abandon_wait(
        &self,
        table: &mut LockTable,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<(), TransactionError> {
        if let Some(queue) = table.queues.get_mut(&rid) {
            if queue.remove_request(txn.id()) {
                queue.cv.notify_all();
            }
        }
        debug!("txn {} abandoned its wait on {:?}", txn.id(), rid);
        Err(TransactionError::Aborted {
            txn_id: txn.id(),
            reason: AbortReason::Deadlock,
        })
    }
}
