use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::bounded;

use shaledb::{LockError, LockManager, LockMode, PageId, TransactionId};

const WAIT: Duration = Duration::from_millis(300);
const GRANT: Duration = Duration::from_secs(2);

fn new_lock_manager() -> Arc<LockManager> {
    Arc::new(LockManager::new(Duration::from_millis(25)))
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached in time");
}

#[test]
fn test_lock_one_page() {
    let lm = new_lock_manager();
    let (t1, t2) = (TransactionId::new(), TransactionId::new());
    let (p1, p2) = (PageId::new(0, 0), PageId::new(0, 1));

    lm.lock(t1, p1, LockMode::Shared).unwrap();
    assert!(lm.holds_lock(t1, p1));
    assert!(!lm.holds_lock(t1, p2));
    assert!(!lm.holds_lock(t2, p1));

    lm.unlock_transaction(t1);
    assert!(!lm.holds_lock(t1, p1));
}

#[test]
fn test_upgrade_reuses_queue_entry() {
    let lm = new_lock_manager();
    let t1 = TransactionId::new();
    let p1 = PageId::new(0, 0);

    lm.lock(t1, p1, LockMode::Shared).unwrap();
    assert_eq!(lm.queue_length(p1), 1);

    // upgrade with no other holders succeeds in place
    lm.lock(t1, p1, LockMode::Exclusive).unwrap();
    assert_eq!(lm.queue_length(p1), 1);
    assert!(lm.holds_lock(t1, p1));

    // two acquisitions, so two releases
    lm.unlock(t1, p1).unwrap();
    assert!(lm.holds_lock(t1, p1));
    lm.unlock(t1, p1).unwrap();
    assert!(!lm.holds_lock(t1, p1));
}

#[test]
fn test_nested_acquisition_refcount() {
    let lm = new_lock_manager();
    let t1 = TransactionId::new();
    let p1 = PageId::new(0, 0);

    lm.lock(t1, p1, LockMode::Shared).unwrap();
    lm.lock(t1, p1, LockMode::Shared).unwrap();
    assert_eq!(lm.queue_length(p1), 1);

    lm.unlock(t1, p1).unwrap();
    assert!(lm.holds_lock(t1, p1));
    lm.unlock(t1, p1).unwrap();
    assert!(!lm.holds_lock(t1, p1));

    // releasing a lock that is not held is a contract violation
    assert!(matches!(
        lm.unlock(t1, p1),
        Err(LockError::NotHeld { .. })
    ));
}

#[test]
fn test_try_lock() {
    let lm = new_lock_manager();
    let (t1, t2) = (TransactionId::new(), TransactionId::new());
    let p1 = PageId::new(0, 0);

    lm.lock(t1, p1, LockMode::Exclusive).unwrap();
    assert!(!lm.try_lock(t2, p1, LockMode::Shared));
    assert!(!lm.holds_lock(t2, p1));

    lm.unlock_transaction(t1);
    assert!(lm.try_lock(t2, p1, LockMode::Shared));
    assert!(lm.holds_lock(t2, p1));

    // shared holders may coexist
    assert!(lm.try_lock(t1, p1, LockMode::Shared));
    // but neither can upgrade without waiting
    assert!(!lm.try_lock(t2, p1, LockMode::Exclusive));
}

#[test]
fn test_release_promotes_shared_then_stops_at_exclusive() {
    // A holds X; B waits for S; C waits for X behind B. Releasing A grants
    // B and leaves C blocked until B releases too.
    let lm = new_lock_manager();
    let (a, b, c) = (TransactionId::new(), TransactionId::new(), TransactionId::new());
    let p1 = PageId::new(0, 0);

    lm.lock(a, p1, LockMode::Exclusive).unwrap();

    let (b_granted_tx, b_granted_rx) = bounded::<()>(1);
    let lm_b = Arc::clone(&lm);
    let hb = thread::spawn(move || {
        lm_b.lock(b, p1, LockMode::Shared).unwrap();
        b_granted_tx.send(()).unwrap();
    });
    wait_until(|| lm.queue_length(p1) == 2);

    let (c_granted_tx, c_granted_rx) = bounded::<()>(1);
    let lm_c = Arc::clone(&lm);
    let hc = thread::spawn(move || {
        lm_c.lock(c, p1, LockMode::Exclusive).unwrap();
        c_granted_tx.send(()).unwrap();
    });
    wait_until(|| lm.queue_length(p1) == 3);

    lm.unlock(a, p1).unwrap();
    b_granted_rx.recv_timeout(GRANT).unwrap();
    assert!(lm.holds_lock(b, p1));
    assert!(c_granted_rx.recv_timeout(WAIT).is_err());
    assert!(!lm.holds_lock(c, p1));

    lm.unlock(b, p1).unwrap();
    c_granted_rx.recv_timeout(GRANT).unwrap();
    assert!(lm.holds_lock(c, p1));

    lm.unlock_transaction(c);
    hb.join().unwrap();
    hc.join().unwrap();
}

#[test]
fn test_upgrade_deadlock_picks_one_victim() {
    // Both transactions hold SHARED and request EXCLUSIVE: a classic
    // conversion deadlock. Exactly one must be denied by the detector.
    let lm = new_lock_manager();
    let (a, b) = (TransactionId::new(), TransactionId::new());
    let p1 = PageId::new(0, 0);

    lm.lock(a, p1, LockMode::Shared).unwrap();
    lm.lock(b, p1, LockMode::Shared).unwrap();

    let (tx, rx) = bounded::<(TransactionId, Result<(), LockError>)>(2);
    for tid in [a, b] {
        let lm = Arc::clone(&lm);
        let tx = tx.clone();
        thread::spawn(move || {
            let result = lm.lock(tid, p1, LockMode::Exclusive);
            if result.is_err() {
                lm.unlock_transaction(tid);
            }
            tx.send((tid, result)).unwrap();
        });
    }

    let first = rx.recv_timeout(GRANT).unwrap();
    let second = rx.recv_timeout(GRANT).unwrap();
    let mut results = [first, second];
    results.sort_by_key(|(tid, _)| *tid);

    let aborted: Vec<_> = results.iter().filter(|(_, r)| r.is_err()).collect();
    assert_eq!(aborted.len(), 1, "exactly one victim expected");
    assert!(matches!(aborted[0].1, Err(LockError::Aborted(_))));

    let (winner, _) = results
        .iter()
        .find(|(_, r)| r.is_ok())
        .expect("one transaction must win");
    assert!(lm.holds_lock(*winner, p1));
    lm.unlock_transaction(*winner);
}

#[test]
fn test_three_transaction_interleaving() {
    // Regression scenario: T1 and T2 share P1, T3 holds X on P2 and queues
    // for X on P1, then T1 queues an upgrade on P1. T2's release lets the
    // upgrade through first; T3 gets P1 only after T1 finishes.
    let lm = new_lock_manager();
    let (t1, t2, t3) = (TransactionId::new(), TransactionId::new(), TransactionId::new());
    let p1 = PageId::new(0, 0);
    let p2 = PageId::new(0, 1);

    let (to1_tx, to1_rx) = bounded::<()>(1);
    let (from1_tx, from1_rx) = bounded::<()>(1);
    let (to2_tx, to2_rx) = bounded::<()>(1);
    let (from2_tx, from2_rx) = bounded::<()>(1);
    let (to3_tx, to3_rx) = bounded::<()>(1);
    let (from3_tx, from3_rx) = bounded::<()>(1);

    let lm1 = Arc::clone(&lm);
    let h1 = thread::spawn(move || {
        to1_rx.recv().unwrap();
        lm1.lock(t1, p1, LockMode::Shared).unwrap();
        from1_tx.send(()).unwrap();

        to1_rx.recv().unwrap();
        lm1.lock(t1, p1, LockMode::Exclusive).unwrap();
        from1_tx.send(()).unwrap();

        to1_rx.recv().unwrap();
        lm1.unlock_transaction(t1);
        from1_tx.send(()).unwrap();
    });

    let lm2 = Arc::clone(&lm);
    let h2 = thread::spawn(move || {
        to2_rx.recv().unwrap();
        lm2.lock(t2, p1, LockMode::Shared).unwrap();
        from2_tx.send(()).unwrap();

        to2_rx.recv().unwrap();
        lm2.unlock(t2, p1).unwrap();
        from2_tx.send(()).unwrap();
    });

    let lm3 = Arc::clone(&lm);
    let h3 = thread::spawn(move || {
        to3_rx.recv().unwrap();
        lm3.lock(t3, p2, LockMode::Exclusive).unwrap();
        from3_tx.send(()).unwrap();

        to3_rx.recv().unwrap();
        lm3.lock(t3, p1, LockMode::Exclusive).unwrap();
        from3_tx.send(()).unwrap();
    });

    to1_tx.send(()).unwrap();
    from1_rx.recv().unwrap();
    assert!(lm.holds_lock(t1, p1));

    to2_tx.send(()).unwrap();
    from2_rx.recv().unwrap();
    assert!(lm.holds_lock(t2, p1));

    to3_tx.send(()).unwrap();
    from3_rx.recv().unwrap();
    assert!(lm.holds_lock(t3, p2));

    // T3 queues for X on P1 and blocks behind the shared holders
    to3_tx.send(()).unwrap();
    assert!(from3_rx.recv_timeout(WAIT).is_err());

    // T1's upgrade also blocks: T2 still shares P1
    to1_tx.send(()).unwrap();
    assert!(from1_rx.recv_timeout(WAIT).is_err());

    // T2 lets go: the conversion wins over T3's waiting request
    to2_tx.send(()).unwrap();
    from2_rx.recv().unwrap();
    assert!(!lm.holds_lock(t2, p1));

    from1_rx.recv_timeout(GRANT).unwrap();
    assert!(lm.holds_lock(t1, p1));
    assert!(!lm.holds_lock(t3, p1));

    // T1 finishes; now T3 gets P1
    to1_tx.send(()).unwrap();
    from1_rx.recv().unwrap();
    from3_rx.recv_timeout(GRANT).unwrap();
    assert!(lm.holds_lock(t3, p1));

    lm.unlock_transaction(t3);
    h1.join().unwrap();
    h2.join().unwrap();
    h3.join().unwrap();
}
