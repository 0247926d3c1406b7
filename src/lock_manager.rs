//! Per-allocation blocking reader/writer lock for cross-thread access.
//!
//! The borrow tracker covers synchronous, same-thread access. When a
//! buffer is shared with worker threads, or an access must be held across
//! a point where other native code can run on the same buffer, the caller
//! routes through this lock instead: any number of concurrent shared
//! holders, or exactly one exclusive holder, never mixed.
//!
//! Fairness is FIFO across mode boundaries. A waiting writer is never
//! perpetually skipped by a steady stream of readers: readers arriving
//! behind it queue behind it. When the queue head is a reader, all
//! consecutive leading readers are admitted together; when it is a
//! writer, exactly that writer is admitted.
//!
//! The blocking `lock` has no built-in timeout. A holder that never
//! releases stalls its waiters indefinitely; callers needing bounded
//! waits layer a deadline over `try_lock`. That tradeoff is accepted for
//! simplicity.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::AccessError;
use crate::handle::AccessMode;
use crate::heap::{Allocation, BackingId};

#[derive(Debug, Default)]
struct QueueState {
    active_shared: u32,
    active_exclusive: bool,
    /// FIFO wait queue of (token, requested mode).
    waiters: VecDeque<(u64, AccessMode)>,
    next_token: u64,
}

impl QueueState {
    fn grantable(&self, mode: AccessMode) -> bool {
        match mode {
            AccessMode::Read => !self.active_exclusive,
            AccessMode::Write => !self.active_exclusive && self.active_shared == 0,
        }
    }

    fn admit(&mut self, mode: AccessMode) {
        match mode {
            AccessMode::Read => self.active_shared += 1,
            AccessMode::Write => self.active_exclusive = true,
        }
    }
}

/// The per-allocation lock state. Embedded in every `Allocation`.
#[derive(Debug, Default)]
pub(crate) struct LockQueue {
    inner: Mutex<QueueState>,
    cond: Condvar,
}

impl LockQueue {
    /// Block until the requested mode is grantable under FIFO order.
    pub(crate) fn lock(&self, mode: AccessMode) {
        let mut state = self.inner.lock();

        // Fast path: nobody waiting and the mode is compatible.
        if state.waiters.is_empty() && state.grantable(mode) {
            state.admit(mode);
            return;
        }

        let token = state.next_token;
        state.next_token += 1;
        state.waiters.push_back((token, mode));

        loop {
            let at_head = state.waiters.front().map(|w| w.0) == Some(token);

            if at_head && state.grantable(mode) {
                state.waiters.pop_front();
                state.admit(mode);

                // A granted reader exposes the next waiter as the new
                // head; if that is also a reader it must be admitted in
                // the same batch.
                if mode == AccessMode::Read {
                    self.cond.notify_all();
                }

                return;
            }

            self.cond.wait(&mut state);
        }
    }

    /// Non-blocking probe. Refuses whenever a grant would overtake the
    /// wait queue, so a waiting writer cannot be jumped via `try_lock`.
    pub(crate) fn try_lock(&self, mode: AccessMode) -> bool {
        let mut state = self.inner.lock();

        if state.waiters.is_empty() && state.grantable(mode) {
            state.admit(mode);
            true
        } else {
            false
        }
    }

    pub(crate) fn unlock(&self, mode: AccessMode) {
        let mut state = self.inner.lock();

        match mode {
            AccessMode::Read => {
                debug_assert!(state.active_shared > 0, "lock ticket released twice");
                state.active_shared -= 1;
            }
            AccessMode::Write => {
                debug_assert!(state.active_exclusive, "lock ticket released twice");
                state.active_exclusive = false;
            }
        }

        // All waiters are notified; only the queue head (and, for a
        // reader head, the consecutive readers it unblocks in turn) can
        // actually proceed, which realizes the reader/writer wake policy.
        self.cond.notify_all();
    }

    /// True iff nothing holds or waits for the lock. Used by tests and
    /// by teardown assertions.
    pub(crate) fn is_idle(&self) -> bool {
        let state = self.inner.lock();
        state.active_shared == 0 && !state.active_exclusive && state.waiters.is_empty()
    }
}

/// Proof of a currently valid cross-thread lock grant.
///
/// Released exactly once, on drop; waiters are woken at that point.
#[derive(Debug)]
pub struct LockTicket {
    alloc: Arc<Allocation>,
    mode: AccessMode,
}

impl LockTicket {
    /// Block until the lock is granted.
    pub(crate) fn acquire(alloc: Arc<Allocation>, mode: AccessMode) -> Self {
        alloc.lock_queue().lock(mode);
        log::trace!("lock {:?} on {} granted", mode, alloc.id());
        Self { alloc, mode }
    }

    /// Non-blocking acquisition.
    pub(crate) fn try_acquire(alloc: Arc<Allocation>, mode: AccessMode) -> Result<Self, AccessError> {
        if alloc.lock_queue().try_lock(mode) {
            log::trace!("try_lock {:?} on {} granted", mode, alloc.id());
            Ok(Self { alloc, mode })
        } else {
            log::trace!("try_lock {:?} on {} refused: WouldBlock", mode, alloc.id());
            Err(AccessError::WouldBlock)
        }
    }

    pub fn backing(&self) -> BackingId {
        self.alloc.id()
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Release the ticket. Equivalent to dropping it.
    pub fn release(self) {}
}

impl Drop for LockTicket {
    fn drop(&mut self) {
        self.alloc.lock_queue().unlock(self.mode);
        log::trace!("lock {:?} on {} released", self.mode, self.alloc.id());
    }
}
