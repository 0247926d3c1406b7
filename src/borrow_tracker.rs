//! Per-allocation borrow state machine for same-thread access.
//!
//! The host language has no borrow checker, so the aliasing discipline a
//! type system would enforce statically is reconstructed here at runtime:
//! each allocation is `Free`, shared by `n` readers, or held exclusively
//! by one writer, and the three are mutually exclusive.
//!
//! This tracker never blocks. A conflicting acquisition on the same call
//! stack means the conflicting holder is the *current thread* — an outer
//! native frame still has a view open — and blocking would hang that
//! thread forever. Surfacing `Busy` immediately is the only sound policy.
//!
//! The state is a single atomic per allocation. By construction only the
//! thread holding the host call transitions it on the synchronous path,
//! so there is nothing to serialize; the atomic exists so the state can
//! also back the cross-thread lock path (see `lock_manager`) and so that
//! a discipline violation across threads degrades to `Busy` instead of a
//! data race.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::AccessError;
use crate::handle::AccessMode;
use crate::heap::{Allocation, BackingId};

/// Sentinel for the exclusive state; any other non-zero value is a
/// shared-holder count.
const EXCLUSIVE: u32 = u32::MAX;

/// Observable borrow state of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorrowState {
    Free,
    Shared(u32),
    Exclusive,
}

/// The per-allocation borrow flag. Embedded in every `Allocation`.
#[derive(Debug, Default)]
pub(crate) struct BorrowCell(AtomicU32);

impl BorrowCell {
    pub(crate) fn state(&self) -> BorrowState {
        match self.0.load(Ordering::Acquire) {
            0 => BorrowState::Free,
            EXCLUSIVE => BorrowState::Exclusive,
            n => BorrowState::Shared(n),
        }
    }

    /// Try to add a shared holder. Fails iff the state is `Exclusive`.
    pub(crate) fn try_shared(&self) -> bool {
        self.0
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |cur| {
                // EXCLUSIVE - 1 would collide with the sentinel on +1.
                if cur >= EXCLUSIVE - 1 {
                    None
                } else {
                    Some(cur + 1)
                }
            })
            .is_ok()
    }

    /// Try to take the exclusive state. Fails unless the state is `Free`.
    pub(crate) fn try_exclusive(&self) -> bool {
        self.0
            .compare_exchange(0, EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn release_shared(&self) {
        let prev = self.0.fetch_sub(1, Ordering::Release);
        debug_assert!(
            prev != 0 && prev != EXCLUSIVE,
            "shared borrow ticket released twice (state underflow)"
        );
    }

    pub(crate) fn release_exclusive(&self) {
        let prev = self.0.swap(0, Ordering::Release);
        debug_assert!(
            prev == EXCLUSIVE,
            "exclusive borrow ticket released twice (state was not Exclusive)"
        );
    }
}

/// Proof of a currently valid borrow grant.
///
/// Releasing is tied to drop, so a ticket is consumed exactly once on
/// every exit path, including unwinding. The ticket keeps the allocation
/// record alive; a host-side detach while a ticket is open cannot free
/// the storage out from under the holder.
#[derive(Debug)]
pub struct BorrowTicket {
    alloc: Arc<Allocation>,
    mode: AccessMode,
}

impl BorrowTicket {
    /// Acquire a borrow ticket, or fail fast with `Busy`.
    pub(crate) fn acquire(alloc: Arc<Allocation>, mode: AccessMode) -> Result<Self, AccessError> {
        let ok = match mode {
            AccessMode::Read => alloc.borrow().try_shared(),
            AccessMode::Write => alloc.borrow().try_exclusive(),
        };

        if !ok {
            log::trace!("borrow {:?} on {} refused: Busy", mode, alloc.id());
            return Err(AccessError::Busy);
        }

        log::trace!("borrow {:?} on {} granted", mode, alloc.id());

        Ok(Self { alloc, mode })
    }

    pub fn backing(&self) -> BackingId {
        self.alloc.id()
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub(crate) fn allocation(&self) -> &Allocation {
        &self.alloc
    }

    /// Release the ticket. Equivalent to dropping it; provided so call
    /// sites can make the release point explicit.
    pub fn release(self) {}
}

impl Drop for BorrowTicket {
    fn drop(&mut self) {
        match self.mode {
            AccessMode::Read => self.alloc.borrow().release_shared(),
            AccessMode::Write => self.alloc.borrow().release_exclusive(),
        }
        log::trace!("borrow {:?} on {} released", self.mode, self.alloc.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_counts_up_and_down() {
        let cell = BorrowCell::default();
        assert_eq!(cell.state(), BorrowState::Free);

        assert!(cell.try_shared());
        assert!(cell.try_shared());
        assert_eq!(cell.state(), BorrowState::Shared(2));

        cell.release_shared();
        assert_eq!(cell.state(), BorrowState::Shared(1));
        cell.release_shared();
        assert_eq!(cell.state(), BorrowState::Free);
    }

    #[test]
    fn test_exclusive_excludes_everything() {
        let cell = BorrowCell::default();
        assert!(cell.try_exclusive());

        assert!(!cell.try_shared());
        assert!(!cell.try_exclusive());
        assert_eq!(cell.state(), BorrowState::Exclusive);

        cell.release_exclusive();
        assert_eq!(cell.state(), BorrowState::Free);
    }

    #[test]
    fn test_shared_blocks_exclusive_until_drained() {
        let cell = BorrowCell::default();
        assert!(cell.try_shared());
        assert!(!cell.try_exclusive());

        cell.release_shared();
        assert!(cell.try_exclusive());
        cell.release_exclusive();
    }
}
