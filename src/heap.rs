//! Host-owned backing allocations and the process-wide allocation table.
//!
//! `HostHeap` stands in for the host runtime's memory manager: it owns
//! growable byte allocations, can resize them (physically relocating
//! storage, the way a moving collector or buffer growth would) and can
//! reclaim them while native code still holds handles.
//!
//! The engine never frees an allocation itself and never assumes a
//! stable address: every access re-resolves through the `BackingId`.
//! Resizing routes through the engine's own exclusive-access discipline,
//! so storage can never move while any view is open.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::borrow_tracker::{BorrowCell, BorrowState, BorrowTicket};
use crate::error::AccessError;
use crate::handle::AccessMode;
use crate::lock_manager::{LockQueue, LockTicket};

/// Stable identifier of a backing allocation for its lifetime.
///
/// Ids are never reused within a process, so a stale id held across a
/// reclaim resolves to `Detached` instead of aliasing a new allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackingId(u64);

impl BackingId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for BackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backing#{}", self.0)
    }
}

/// One host-owned allocation: the storage plus its arbitration state.
///
/// Borrow and lock state live exactly as long as the allocation record;
/// there is no side table to tear down separately.
pub(crate) struct Allocation {
    id: BackingId,
    /// The physical bytes. Only ever touched while a ticket that permits
    /// the access is held; see the safety note below.
    data: UnsafeCell<Vec<u8>>,
    /// Capacity mirror, readable without a ticket. Updated only under an
    /// exclusive grant (resize), so it is stable while any ticket is held.
    capacity: AtomicUsize,
    borrow: BorrowCell,
    lock: LockQueue,
}

// SAFETY: `data` is only dereferenced while a ticket for this allocation
// is held. A shared ticket hands out `&[u8]` only, and the borrow state
// machine guarantees no exclusive holder coexists with it; an exclusive
// ticket is unique by the same machine; resize and all other mutation
// paths require the exclusive state. The UnsafeCell is therefore
// arbitrated exactly like a runtime RefCell, with tickets as the guards.
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

impl Allocation {
    fn new(id: BackingId, bytes: Vec<u8>) -> Self {
        let capacity = AtomicUsize::new(bytes.len());
        Self {
            id,
            data: UnsafeCell::new(bytes),
            capacity,
            borrow: BorrowCell::default(),
            lock: LockQueue::default(),
        }
    }

    pub(crate) fn id(&self) -> BackingId {
        self.id
    }

    pub(crate) fn borrow(&self) -> &BorrowCell {
        &self.borrow
    }

    pub(crate) fn lock_queue(&self) -> &LockQueue {
        &self.lock
    }

    /// Current capacity in bytes. Stable while any ticket is held.
    pub(crate) fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Bytes of the allocation, for a holder of a shared or exclusive
    /// ticket.
    ///
    /// # Safety
    ///
    /// The caller must hold a ticket for this allocation for the whole
    /// lifetime `'a`.
    pub(crate) unsafe fn bytes<'a>(&'a self) -> &'a [u8] {
        (*self.data.get()).as_slice()
    }

    /// Bytes of the allocation, for a holder of an exclusive ticket.
    ///
    /// # Safety
    ///
    /// The caller must hold an *exclusive* ticket for this allocation for
    /// the whole lifetime `'a`.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn bytes_mut<'a>(&'a self) -> &'a mut [u8] {
        (*self.data.get()).as_mut_slice()
    }

    /// Resize the storage in place. Requires the exclusive borrow state,
    /// which the caller must have established.
    ///
    /// # Safety
    ///
    /// The caller must hold an exclusive ticket for this allocation.
    unsafe fn resize_storage(&self, new_len: usize) {
        (*self.data.get()).resize(new_len, 0);
        self.capacity.store(new_len, Ordering::Release);
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// The process-wide allocation table, standing in for the host's memory
/// manager.
#[derive(Debug, Default)]
pub struct HostHeap {
    allocations: Mutex<HashMap<BackingId, Arc<Allocation>>>,
    next_id: AtomicU64,
}

impl HostHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a zero-filled allocation of `len` bytes.
    pub fn alloc(&self, len: usize) -> BackingId {
        self.insert(vec![0u8; len])
    }

    /// Create an allocation initialized from `bytes`.
    pub fn alloc_from(&self, bytes: &[u8]) -> BackingId {
        self.insert(bytes.to_vec())
    }

    fn insert(&self, bytes: Vec<u8>) -> BackingId {
        let id = BackingId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let len = bytes.len();

        self.allocations
            .lock()
            .insert(id, Arc::new(Allocation::new(id, bytes)));

        log::debug!("{} allocated ({} bytes)", id, len);

        id
    }

    /// Re-resolve an id to its allocation record. Every acquisition path
    /// starts here; nothing caches the result across acquisitions.
    pub(crate) fn resolve(&self, id: BackingId) -> Result<Arc<Allocation>, AccessError> {
        self.allocations
            .lock()
            .get(&id)
            .cloned()
            .ok_or(AccessError::Detached)
    }

    /// Current capacity of an allocation, without holding a ticket.
    ///
    /// The value may be stale by the time the caller uses it; acquisition
    /// re-checks under a ticket. Suitable for handle construction and
    /// diagnostics only.
    pub fn capacity_hint(&self, id: BackingId) -> Result<usize, AccessError> {
        Ok(self.resolve(id)?.capacity())
    }

    /// Acquire a same-thread shared borrow on an allocation. Fails fast
    /// with `Busy` on conflict; never blocks.
    pub fn acquire_shared(&self, id: BackingId) -> Result<BorrowTicket, AccessError> {
        BorrowTicket::acquire(self.resolve(id)?, AccessMode::Read)
    }

    /// Acquire a same-thread exclusive borrow on an allocation. Fails
    /// fast with `Busy` on conflict; never blocks.
    pub fn acquire_exclusive(&self, id: BackingId) -> Result<BorrowTicket, AccessError> {
        BorrowTicket::acquire(self.resolve(id)?, AccessMode::Write)
    }

    /// Block until a cross-thread lock on the allocation is granted.
    pub fn lock(&self, id: BackingId, mode: AccessMode) -> Result<LockTicket, AccessError> {
        Ok(LockTicket::acquire(self.resolve(id)?, mode))
    }

    /// Non-blocking lock probe; `WouldBlock` if the grant would have to
    /// wait or would overtake queued waiters.
    pub fn try_lock(&self, id: BackingId, mode: AccessMode) -> Result<LockTicket, AccessError> {
        LockTicket::try_acquire(self.resolve(id)?, mode)
    }

    /// Observable borrow state, for assertions and diagnostics.
    pub fn borrow_state(&self, id: BackingId) -> Result<BorrowState, AccessError> {
        Ok(self.resolve(id)?.borrow().state())
    }

    /// True iff no lock is held or queued on the allocation.
    pub fn lock_is_idle(&self, id: BackingId) -> Result<bool, AccessError> {
        Ok(self.resolve(id)?.lock_queue().is_idle())
    }

    /// Host-side resize. Storage may physically relocate; open handles
    /// stay valid because every access re-resolves, but a handle whose
    /// range no longer fits will fail `OutOfBounds` on its next
    /// acquisition.
    ///
    /// The resize itself goes through the cross-thread exclusive path, so
    /// it waits for lock holders on other threads and refuses with `Busy`
    /// if a same-thread borrow is still open (a native bug: the host
    /// cannot run while native code holds a synchronous borrow).
    pub fn resize(&self, id: BackingId, new_len: usize) -> Result<(), AccessError> {
        let alloc = self.resolve(id)?;

        let lock = LockTicket::acquire(Arc::clone(&alloc), AccessMode::Write);
        let borrow = BorrowTicket::acquire(Arc::clone(&alloc), AccessMode::Write)?;

        let old_len = alloc.capacity();

        // SAFETY: an exclusive borrow ticket is held; no other view of
        // this allocation exists until it is released.
        unsafe { alloc.resize_storage(new_len) };

        log::debug!("{} resized {} -> {} bytes", id, old_len, new_len);

        borrow.release();
        lock.release();

        Ok(())
    }

    /// Host-side reclaim, as garbage collection would perform it.
    ///
    /// The id stops resolving immediately; outstanding tickets keep the
    /// storage alive until they drop, so an open view is never freed out
    /// from under its holder.
    pub fn detach(&self, id: BackingId) -> Result<(), AccessError> {
        match self.allocations.lock().remove(&id) {
            Some(_) => {
                log::debug!("{} detached", id);
                Ok(())
            }
            None => Err(AccessError::Detached),
        }
    }

    /// Number of live allocations. Diagnostics only.
    pub fn len(&self) -> usize {
        self.allocations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_capacity() {
        let heap = HostHeap::new();
        let id = heap.alloc(16);
        assert_eq!(heap.capacity_hint(id), Ok(16));
        assert_eq!(heap.borrow_state(id), Ok(BorrowState::Free));
    }

    #[test]
    fn test_detach_makes_id_stale() {
        let heap = HostHeap::new();
        let id = heap.alloc(8);
        heap.detach(id).unwrap();

        assert_eq!(heap.capacity_hint(id), Err(AccessError::Detached));
        assert_eq!(heap.detach(id), Err(AccessError::Detached));
    }

    #[test]
    fn test_resize_refused_while_borrowed() {
        let heap = HostHeap::new();
        let id = heap.alloc(8);

        let ticket = heap.acquire_shared(id).unwrap();
        assert_eq!(heap.resize(id, 32), Err(AccessError::Busy));
        ticket.release();

        heap.resize(id, 32).unwrap();
        assert_eq!(heap.capacity_hint(id), Ok(32));
    }

    #[test]
    fn test_ids_are_never_reused() {
        let heap = HostHeap::new();
        let a = heap.alloc(4);
        heap.detach(a).unwrap();
        let b = heap.alloc(4);
        assert_ne!(a, b);
    }
}
