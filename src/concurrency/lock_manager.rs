use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::Sender;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{PageId, TransactionId};
use crate::concurrency::deadlock;
use crate::concurrency::error::LockError;

/// Lock modes on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    /// Whether a request for `wanted` can coexist with the strongest mode
    /// already held by other transactions. Any two SHARED grants are
    /// compatible; EXCLUSIVE is compatible with nothing else.
    pub fn compatible(held: Option<LockMode>, wanted: LockMode) -> bool {
        match held {
            None => true,
            Some(LockMode::Shared) => wanted == LockMode::Shared,
            Some(LockMode::Exclusive) => false,
        }
    }

    /// The dominating mode of an accumulated grant set.
    fn max(held: Option<LockMode>, other: LockMode) -> LockMode {
        match (held, other) {
            (Some(LockMode::Exclusive), _) | (_, LockMode::Exclusive) => LockMode::Exclusive,
            _ => LockMode::Shared,
        }
    }
}

/// State of one transaction's interest in one page. A lock upgrade moves a
/// GRANTED request to `Converting(target)` rather than queuing a second
/// request; the deadlock detector moves blocked requests to `Denied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestStatus {
    Waiting,
    Converting(LockMode),
    Granted,
    Denied,
}

#[derive(Debug)]
pub(crate) struct LockRequest {
    pub tid: TransactionId,
    pub mode: LockMode,
    pub status: RequestStatus,
    /// Nested acquisitions by the same transaction reuse this request.
    pub refs: u32,
}

impl LockRequest {
    pub(crate) fn holds(&self) -> bool {
        matches!(self.status, RequestStatus::Granted | RequestStatus::Converting(_))
    }
}

/// Arrival-ordered requests for one page. Created lazily on first request and
/// kept for the page's lifetime.
#[derive(Default)]
pub(crate) struct LockQueue {
    pub state: Mutex<QueueState>,
    pub cond: Condvar,
}

#[derive(Default)]
pub(crate) struct QueueState {
    pub requests: Vec<LockRequest>,
}

impl QueueState {
    fn position(&self, tid: TransactionId) -> Option<usize> {
        self.requests.iter().position(|r| r.tid == tid)
    }

    /// Strongest mode currently held by transactions other than `tid`.
    /// A CONVERTING request still holds its pre-conversion mode.
    fn held_mode_excluding(&self, tid: TransactionId) -> Option<LockMode> {
        let mut held = None;
        for r in &self.requests {
            if r.tid != tid && r.holds() {
                held = Some(LockMode::max(held, r.mode));
            }
        }
        held
    }

    /// Whether any other transaction is WAITING or CONVERTING on this page.
    fn other_pending(&self, tid: TransactionId) -> bool {
        self.requests.iter().any(|r| {
            r.tid != tid
                && matches!(r.status, RequestStatus::Waiting | RequestStatus::Converting(_))
        })
    }

    /// Release-time re-evaluation: walk the queue in arrival order, promoting
    /// every WAITING/CONVERTING request that is now compatible with the
    /// granted set, and stop at the first one that is still blocked. Later
    /// compatible SHARED requests behind a blocked one stay waiting; that is
    /// a documented fairness trade-off, not an oversight.
    fn promote_waiters(&mut self) -> bool {
        let mut promoted = false;
        for i in 0..self.requests.len() {
            let wanted = match self.requests[i].status {
                RequestStatus::Granted | RequestStatus::Denied => continue,
                RequestStatus::Waiting => self.requests[i].mode,
                RequestStatus::Converting(target) => target,
            };
            let held = self.held_mode_excluding(self.requests[i].tid);
            if !LockMode::compatible(held, wanted) {
                break;
            }
            let req = &mut self.requests[i];
            req.mode = wanted;
            req.status = RequestStatus::Granted;
            promoted = true;
        }
        promoted
    }
}

/// Queue and transaction lookup tables shared with the detector thread.
/// Cross-references between queues and transactions go through these id-keyed
/// maps, never through raw back-pointers. Lock order is always a single
/// LockQueue mutex first, then the transaction table.
#[derive(Default)]
pub(crate) struct LockTables {
    queues: Mutex<HashMap<PageId, Arc<LockQueue>>>,
    txn_pages: Mutex<HashMap<TransactionId, HashSet<PageId>>>,
}

impl LockTables {
    fn queue(&self, pid: PageId) -> Arc<LockQueue> {
        Arc::clone(self.queues.lock().entry(pid).or_default())
    }

    fn existing_queue(&self, pid: PageId) -> Option<Arc<LockQueue>> {
        self.queues.lock().get(&pid).cloned()
    }

    pub(crate) fn all_queues(&self) -> Vec<(PageId, Arc<LockQueue>)> {
        self.queues.lock().iter().map(|(pid, q)| (*pid, Arc::clone(q))).collect()
    }

    fn register(&self, tid: TransactionId, pid: PageId) {
        self.txn_pages.lock().entry(tid).or_default().insert(pid);
    }

    fn unregister(&self, tid: TransactionId, pid: PageId) {
        let mut table = self.txn_pages.lock();
        if let Some(set) = table.get_mut(&tid) {
            set.remove(&pid);
            if set.is_empty() {
                table.remove(&tid);
            }
        }
    }

    fn take_pages(&self, tid: TransactionId) -> Vec<PageId> {
        self.txn_pages
            .lock()
            .remove(&tid)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }
}

/// Page-level shared/exclusive lock manager with lock upgrade and background
/// deadlock detection. One wait queue per page; blocked `lock` calls park on
/// the queue's condition variable until a release promotes them or the
/// detector denies them.
pub struct LockManager {
    tables: Arc<LockTables>,
    shutdown: Option<Sender<()>>,
    detector: Option<JoinHandle<()>>,
}

impl LockManager {
    /// Create a lock manager and spawn its deadlock detector, which runs one
    /// detection pass per `detection_interval`.
    pub fn new(detection_interval: Duration) -> Self {
        let tables = Arc::new(LockTables::default());
        let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded::<()>(0);
        let detector_tables = Arc::clone(&tables);
        let detector = std::thread::spawn(move || {
            let ticker = crossbeam::channel::tick(detection_interval);
            loop {
                crossbeam::select! {
                    recv(ticker) -> _ => deadlock::run_detection_pass(&detector_tables),
                    recv(shutdown_rx) -> _ => break,
                }
            }
        });
        Self { tables, shutdown: Some(shutdown_tx), detector: Some(detector) }
    }

    /// Blocking acquire. Returns once the lock is granted; fails with
    /// `LockError::Aborted` if the deadlock detector picks this transaction
    /// as a victim while it is blocked.
    ///
    /// Repeated acquisition by the same transaction bumps the request's
    /// reference count. Requesting EXCLUSIVE while holding SHARED converts
    /// the existing request in place.
    pub fn lock(
        &self,
        tid: TransactionId,
        pid: PageId,
        mode: LockMode,
    ) -> Result<(), LockError> {
        let queue = self.tables.queue(pid);
        let mut state = queue.state.lock();

        match state.position(tid) {
            Some(i) => {
                let held = state.held_mode_excluding(tid);
                let req = &mut state.requests[i];
                match req.status {
                    RequestStatus::Granted => {
                        if req.mode == LockMode::Exclusive || mode == LockMode::Shared {
                            // already covered by the existing grant
                            req.refs += 1;
                            drop(state);
                            self.tables.register(tid, pid);
                            return Ok(());
                        }
                        req.status = RequestStatus::Converting(LockMode::Exclusive);
                        if LockMode::compatible(held, LockMode::Exclusive) {
                            req.mode = LockMode::Exclusive;
                            req.status = RequestStatus::Granted;
                            req.refs += 1;
                            debug!("{tid} upgraded to exclusive on page {pid}");
                            drop(state);
                            self.tables.register(tid, pid);
                            return Ok(());
                        }
                    }
                    RequestStatus::Waiting => {
                        // still queued from an earlier call; raise the target
                        // mode in place instead of queuing a second request
                        if mode == LockMode::Exclusive {
                            req.mode = LockMode::Exclusive;
                        }
                    }
                    RequestStatus::Converting(_) | RequestStatus::Denied => {}
                }
            }
            None => {
                let held = state.held_mode_excluding(tid);
                let pending = state.other_pending(tid);
                let granted = !pending && LockMode::compatible(held, mode);
                state.requests.push(LockRequest {
                    tid,
                    mode,
                    status: if granted { RequestStatus::Granted } else { RequestStatus::Waiting },
                    refs: if granted { 1 } else { 0 },
                });
                if granted {
                    drop(state);
                    self.tables.register(tid, pid);
                    return Ok(());
                }
            }
        }

        // Blocked: wait until a release promotes this request or the
        // detector denies it.
        loop {
            let Some(i) = state.position(tid) else {
                // request was unregistered out from under us (transaction
                // torn down concurrently); treat as an abort
                return Err(LockError::Aborted(tid));
            };
            match state.requests[i].status {
                RequestStatus::Granted => {
                    state.requests[i].refs += 1;
                    drop(state);
                    self.tables.register(tid, pid);
                    return Ok(());
                }
                RequestStatus::Denied => {
                    // restore the queue before propagating the abort
                    state.requests.remove(i);
                    if state.promote_waiters() {
                        queue.cond.notify_all();
                    }
                    drop(state);
                    self.tables.unregister(tid, pid);
                    return Err(LockError::Aborted(tid));
                }
                _ => queue.cond.wait(&mut state),
            }
        }
    }

    /// Non-blocking acquire: grants and returns true iff `lock` would have
    /// returned without waiting. Leaves no queue entry behind on refusal.
    pub fn try_lock(&self, tid: TransactionId, pid: PageId, mode: LockMode) -> bool {
        let queue = self.tables.queue(pid);
        let mut state = queue.state.lock();

        match state.position(tid) {
            Some(i) => {
                let held = state.held_mode_excluding(tid);
                let req = &mut state.requests[i];
                if req.status != RequestStatus::Granted {
                    return false;
                }
                if req.mode == LockMode::Exclusive || mode == LockMode::Shared {
                    req.refs += 1;
                    true
                } else if LockMode::compatible(held, LockMode::Exclusive) {
                    req.mode = LockMode::Exclusive;
                    req.refs += 1;
                    true
                } else {
                    false
                }
            }
            None => {
                let held = state.held_mode_excluding(tid);
                if !state.other_pending(tid) && LockMode::compatible(held, mode) {
                    state.requests.push(LockRequest {
                        tid,
                        mode,
                        status: RequestStatus::Granted,
                        refs: 1,
                    });
                    drop(state);
                    self.tables.register(tid, pid);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Release one acquisition. The grant itself is released only when the
    /// reference count reaches zero; releasing a lock that was never granted
    /// is a contract violation.
    pub fn unlock(&self, tid: TransactionId, pid: PageId) -> Result<(), LockError> {
        let queue = self
            .tables
            .existing_queue(pid)
            .ok_or(LockError::NotHeld { tid, pid })?;
        let mut state = queue.state.lock();
        let i = state.position(tid).ok_or(LockError::NotHeld { tid, pid })?;
        if !state.requests[i].holds() {
            return Err(LockError::NotHeld { tid, pid });
        }
        state.requests[i].refs -= 1;
        if state.requests[i].refs > 0 {
            return Ok(());
        }
        state.requests.remove(i);
        if state.promote_waiters() {
            queue.cond.notify_all();
        }
        drop(state);
        self.tables.unregister(tid, pid);
        debug!("{tid} released page {pid}");
        Ok(())
    }

    /// Unconditionally release every lock the transaction holds. Used at
    /// commit/abort; a no-op for a transaction that holds nothing.
    pub fn unlock_transaction(&self, tid: TransactionId) {
        for pid in self.tables.take_pages(tid) {
            let Some(queue) = self.tables.existing_queue(pid) else { continue };
            let mut state = queue.state.lock();
            if let Some(i) = state.position(tid) {
                state.requests.remove(i);
                if state.promote_waiters() {
                    queue.cond.notify_all();
                }
            }
        }
        debug!("{tid} released all locks");
    }

    /// Whether the transaction currently holds a lock on the page. A
    /// CONVERTING request counts as held: its shared grant is still in force.
    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        let Some(queue) = self.tables.existing_queue(pid) else { return false };
        let state = queue.state.lock();
        state.position(tid).is_some_and(|i| state.requests[i].holds())
    }

    /// Number of queue entries for a page, granted and waiting alike.
    /// Diagnostic surface for tests.
    pub fn queue_length(&self, pid: PageId) -> usize {
        self.tables
            .existing_queue(pid)
            .map(|q| q.state.lock().requests.len())
            .unwrap_or(0)
    }

    /// Run one detection pass immediately instead of waiting for the next
    /// tick. Diagnostic surface for tests.
    pub fn trigger_detection(&self) {
        deadlock::run_detection_pass(&self.tables);
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        // closing the channel wakes the detector out of its select loop
        drop(self.shutdown.take());
        if let Some(handle) = self.detector.take() {
            let _ = handle.join();
        }
    }
}
