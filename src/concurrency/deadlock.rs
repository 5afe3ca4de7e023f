//! Background deadlock detection over the lock tables.
//!
//! Each pass takes a consistent snapshot of every queue (who holds what, who
//! is blocked on what) under the per-queue mutexes, then walks the implied
//! wait-for graph with no locks held. Reaching a transaction that is already
//! on the current walk path indicates a cycle, and the transaction whose walk
//! discovered it is denied. Exactly one victim is chosen per cycle per pass.

use std::collections::{HashMap, HashSet};

use log::warn;

use crate::common::types::{PageId, TransactionId};
use crate::concurrency::lock_manager::{LockMode, LockTables, RequestStatus};

/// The single blocking point of one transaction: the page it waits on and the
/// mode it needs there. A converting request wants its target mode.
#[derive(Debug, Clone, Copy)]
struct BlockedOn {
    pid: PageId,
    wanted: LockMode,
}

/// Per-pass copy of the wait-for state, decoupled from the live queues so the
/// graph walk cannot be invalidated by concurrent grants.
#[derive(Default)]
struct WaitForSnapshot {
    blocked: HashMap<TransactionId, BlockedOn>,
    holders: HashMap<PageId, Vec<(TransactionId, LockMode)>>,
}

fn take_snapshot(tables: &LockTables) -> WaitForSnapshot {
    let mut snap = WaitForSnapshot::default();
    for (pid, queue) in tables.all_queues() {
        let state = queue.state.lock();
        for req in &state.requests {
            match req.status {
                RequestStatus::Granted => {
                    snap.holders.entry(pid).or_default().push((req.tid, req.mode));
                }
                RequestStatus::Converting(target) => {
                    // holds its old mode while waiting for the new one
                    snap.holders.entry(pid).or_default().push((req.tid, req.mode));
                    snap.blocked.insert(req.tid, BlockedOn { pid, wanted: target });
                }
                RequestStatus::Waiting => {
                    snap.blocked.insert(req.tid, BlockedOn { pid, wanted: req.mode });
                }
                RequestStatus::Denied => {}
            }
        }
    }
    snap
}

/// Depth-first walk from `start` along wait-for edges. An edge A -> B exists
/// when A is blocked on a page where B holds a mode incompatible with what A
/// wants. Reaching a transaction that is already on the current walk path
/// reports a cycle; a transaction merely reached through two disjoint paths
/// (a diamond) does not.
fn walk_finds_cycle(snap: &WaitForSnapshot, start: TransactionId) -> bool {
    fn dfs(snap: &WaitForSnapshot, tid: TransactionId, path: &mut HashSet<TransactionId>) -> bool {
        if !path.insert(tid) {
            return true;
        }
        if let Some(blocked) = snap.blocked.get(&tid) {
            if let Some(holders) = snap.holders.get(&blocked.pid) {
                for &(holder, held) in holders {
                    if holder != tid
                        && !LockMode::compatible(Some(held), blocked.wanted)
                        && dfs(snap, holder, path)
                    {
                        return true;
                    }
                }
            }
        }
        path.remove(&tid);
        false
    }

    let mut path = HashSet::new();
    dfs(snap, start, &mut path)
}

/// One detection pass: snapshot, walk from every blocked transaction, deny
/// victims. Denial is an atomic transition under the victim's queue mutex;
/// the denied request may have been granted since the snapshot, in which case
/// it is left alone and the cycle (if still real) is caught next pass.
pub(crate) fn run_detection_pass(tables: &LockTables) {
    let mut snap = take_snapshot(tables);

    let mut starts: Vec<TransactionId> = snap.blocked.keys().copied().collect();
    starts.sort();

    for tid in starts {
        if !snap.blocked.contains_key(&tid) {
            continue;
        }
        if walk_finds_cycle(&snap, tid) {
            let pid = snap.blocked[&tid].pid;
            deny(tables, tid, pid);
            // the cycle is broken; don't pick a second victim for it
            snap.blocked.remove(&tid);
        }
    }
}

fn deny(tables: &LockTables, tid: TransactionId, pid: PageId) {
    let queues = tables.all_queues();
    let Some((_, queue)) = queues.iter().find(|(p, _)| *p == pid) else { return };
    let mut state = queue.state.lock();
    if let Some(req) = state.requests.iter_mut().find(|r| r.tid == tid) {
        if matches!(req.status, RequestStatus::Waiting | RequestStatus::Converting(_)) {
            req.status = RequestStatus::Denied;
            warn!("deadlock: denying {tid} blocked on page {pid}");
            queue.cond.notify_all();
        }
    }
}
