use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use stratumdb::common::types::Rid;
use stratumdb::transaction::{
    AbortReason, IsolationLevel, LockManager, LockManagerConfig, TransactionError,
    TransactionManager, TransactionState,
};

fn setup(detection: bool, interval_ms: u64) -> (Arc<LockManager>, TransactionManager) {
    let lock_manager = LockManager::new(LockManagerConfig {
        detection_interval: Duration::from_millis(interval_ms),
        enable_deadlock_detection: detection,
    });
    let txn_manager = TransactionManager::new(lock_manager.clone());
    (lock_manager, txn_manager)
}

#[test]
fn test_shared_locks_are_compatible() {
    let (lm, tm) = setup(false, 50);
    let rid = Rid::new(1, 1);

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    lm.lock_shared(&t1, rid).unwrap();
    lm.lock_shared(&t2, rid).unwrap();
    assert!(t1.holds_shared(rid));
    assert!(t2.holds_shared(rid));

    tm.commit(&t1).unwrap();
    tm.commit(&t2).unwrap();
}

#[test]
fn test_exclusive_lock_excludes_all_others() {
    let (lm, tm) = setup(false, 50);
    let rid = Rid::new(1, 2);

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    lm.lock_exclusive(&t1, rid).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let waiter = {
        let (lm, t2, order) = (lm.clone(), t2.clone(), order.clone());
        thread::spawn(move || {
            lm.lock_exclusive(&t2, rid).unwrap();
            order.lock().push("t2-granted");
        })
    };

    thread::sleep(Duration::from_millis(100));
    // While t1 holds the exclusive lock, t2 must still be waiting.
    assert!(order.lock().is_empty());
    assert!(!t2.holds_exclusive(rid));

    order.lock().push("t1-released");
    lm.unlock(&t1, rid).unwrap();
    waiter.join().unwrap();

    assert_eq!(*order.lock(), vec!["t1-released", "t2-granted"]);
    assert!(t2.holds_exclusive(rid));
}

#[test]
fn test_shared_request_does_not_barge_past_waiting_exclusive() {
    let (lm, tm) = setup(false, 50);
    let rid = Rid::new(1, 3);

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let t3 = tm.begin(IsolationLevel::RepeatableRead);

    lm.lock_shared(&t1, rid).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let exclusive_waiter = {
        let (lm, t2, order) = (lm.clone(), t2.clone(), order.clone());
        thread::spawn(move || {
            lm.lock_exclusive(&t2, rid).unwrap();
            order.lock().push("x-granted");
            thread::sleep(Duration::from_millis(50));
            lm.unlock(&t2, rid).unwrap();
        })
    };
    thread::sleep(Duration::from_millis(50));

    let shared_waiter = {
        let (lm, t3, order) = (lm.clone(), t3.clone(), order.clone());
        thread::spawn(move || {
            lm.lock_shared(&t3, rid).unwrap();
            order.lock().push("s-granted");
        })
    };
    thread::sleep(Duration::from_millis(50));

    // The late shared request must queue behind the waiting exclusive.
    assert!(order.lock().is_empty());

    lm.unlock(&t1, rid).unwrap();
    exclusive_waiter.join().unwrap();
    shared_waiter.join().unwrap();

    assert_eq!(*order.lock(), vec!["x-granted", "s-granted"]);
}

#[test]
fn test_lock_shared_rejected_under_read_uncommitted() {
    let (lm, tm) = setup(false, 50);
    let rid = Rid::new(2, 1);

    let txn = tm.begin(IsolationLevel::ReadUncommitted);
    let result = lm.lock_shared(&txn, rid);

    assert!(matches!(
        result,
        Err(TransactionError::Aborted {
            reason: AbortReason::LockSharedOnReadUncommitted,
            ..
        })
    ));
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn test_lock_after_unlock_aborts() {
    // Two-phase violation: acquire, release, then acquire again.
    let (lm, tm) = setup(false, 50);
    let rid = Rid::new(2, 2);

    let txn = tm.begin(IsolationLevel::RepeatableRead);
    lm.lock_exclusive(&txn, rid).unwrap();
    lm.unlock(&txn, rid).unwrap();
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let result = lm.lock_shared(&txn, rid);
    assert!(matches!(
        result,
        Err(TransactionError::Aborted {
            reason: AbortReason::LockOnShrinking,
            ..
        })
    ));
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn test_shared_release_under_read_committed_keeps_growing() {
    let (lm, tm) = setup(false, 50);
    let rid = Rid::new(2, 3);

    let txn = tm.begin(IsolationLevel::ReadCommitted);
    lm.lock_shared(&txn, rid).unwrap();
    lm.unlock(&txn, rid).unwrap();

    // Early shared release is allowed under read committed.
    assert_eq!(txn.state(), TransactionState::Growing);
    lm.lock_exclusive(&txn, rid).unwrap();
    assert!(txn.holds_exclusive(rid));

    // An exclusive release still starts the shrinking phase.
    lm.unlock(&txn, rid).unwrap();
    assert_eq!(txn.state(), TransactionState::Shrinking);
}

#[test]
fn test_unlock_without_lock_fails() {
    let (lm, tm) = setup(false, 50);
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    let result = lm.unlock(&txn, Rid::new(9, 9));
    assert!(matches!(result, Err(TransactionError::LockNotHeld(_))));
}

#[test]
fn test_upgrade_waits_for_other_readers() {
    let (lm, tm) = setup(false, 50);
    let rid = Rid::new(3, 1);

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    lm.lock_shared(&t1, rid).unwrap();
    lm.lock_shared(&t2, rid).unwrap();

    let upgrader = {
        let (lm, t1) = (lm.clone(), t1.clone());
        thread::spawn(move || lm.lock_upgrade(&t1, rid))
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!t1.holds_exclusive(rid));

    lm.unlock(&t2, rid).unwrap();
    upgrader.join().unwrap().unwrap();

    assert!(t1.holds_exclusive(rid));
    assert!(!t1.holds_shared(rid));

    // Upgrading granted exclusivity: nobody else may hold anything.
    assert!(!t2.holds_shared(rid));
}

#[test]
fn test_concurrent_upgrade_is_a_conflict() {
    let (lm, tm) = setup(false, 50);
    let rid = Rid::new(3, 2);

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    lm.lock_shared(&t1, rid).unwrap();
    lm.lock_shared(&t2, rid).unwrap();

    // t1 starts upgrading and blocks on t2's shared lock.
    let upgrader = {
        let (lm, t1) = (lm.clone(), t1.clone());
        thread::spawn(move || lm.lock_upgrade(&t1, rid))
    };
    thread::sleep(Duration::from_millis(100));

    // A second upgrade on the same record is an immediate conflict.
    let result = lm.lock_upgrade(&t2, rid);
    assert!(matches!(
        result,
        Err(TransactionError::Aborted {
            reason: AbortReason::UpgradeConflict,
            ..
        })
    ));
    assert_eq!(t2.state(), TransactionState::Aborted);

    // Releasing the aborted reader's locks lets the first upgrade win.
    tm.abort(&t2).unwrap();
    upgrader.join().unwrap().unwrap();
    assert!(t1.holds_exclusive(rid));
}

#[test]
fn test_upgrade_without_shared_lock_fails() {
    let (lm, tm) = setup(false, 50);
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    let result = lm.lock_upgrade(&txn, Rid::new(3, 3));
    assert!(matches!(result, Err(TransactionError::LockNotHeld(_))));
    // Not holding the lock is a caller error, not a protocol abort.
    assert_eq!(txn.state(), TransactionState::Growing);
}

#[test]
fn test_deadlock_detector_aborts_youngest() {
    let (lm, tm) = setup(true, 10);
    let r1 = Rid::new(4, 1);
    let r2 = Rid::new(4, 2);

    let t_old = tm.begin(IsolationLevel::RepeatableRead);
    let t_young = tm.begin(IsolationLevel::RepeatableRead);
    assert!(t_young.id() > t_old.id());

    lm.lock_exclusive(&t_old, r1).unwrap();
    lm.lock_exclusive(&t_young, r2).unwrap();

    let old_side = {
        let (lm, t_old) = (lm.clone(), t_old.clone());
        thread::spawn(move || lm.lock_exclusive(&t_old, r2))
    };
    let young_side = {
        let (lm, t_young) = (lm.clone(), t_young.clone());
        thread::spawn(move || lm.lock_exclusive(&t_young, r1))
    };

    let old_result = old_side.join().unwrap();
    let young_result = young_side.join().unwrap();

    // The youngest transaction on the cycle is the victim; the older
    // one proceeds.
    assert!(old_result.is_ok());
    assert!(matches!(
        young_result,
        Err(TransactionError::Aborted {
            reason: AbortReason::Deadlock,
            ..
        })
    ));
    assert_eq!(t_young.state(), TransactionState::Aborted);
    assert!(t_old.holds_exclusive(r1));
    assert!(t_old.holds_exclusive(r2));

    tm.abort(&t_young).unwrap();
    tm.commit(&t_old).unwrap();
}

#[test]
fn test_exclusive_grant_implies_no_other_holders() {
    let (lm, tm) = setup(false, 50);
    let rid = Rid::new(5, 1);

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let t3 = tm.begin(IsolationLevel::RepeatableRead);

    lm.lock_shared(&t1, rid).unwrap();
    lm.lock_shared(&t2, rid).unwrap();

    let writer = {
        let (lm, t3) = (lm.clone(), t3.clone());
        thread::spawn(move || {
            lm.lock_exclusive(&t3, rid).unwrap();
            // At grant time no other transaction may hold this record.
            t3.holds_exclusive(rid)
        })
    };

    thread::sleep(Duration::from_millis(50));
    lm.unlock(&t1, rid).unwrap();
    thread::sleep(Duration::from_millis(20));
    lm.unlock(&t2, rid).unwrap();

    let granted = writer.join().unwrap();
    assert!(granted);
    assert!(!t1.holds_shared(rid));
    assert!(!t2.holds_shared(rid));
}
