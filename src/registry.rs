//! View registry: the ticket-table surface for host bindings.
//!
//! Closure-based access scopes cannot cross a foreign call boundary; a
//! host binding acquires a view in one native call and releases it in
//! another. The registry keeps the open tickets in a table keyed by
//! opaque view ids: `acquire_view` hands out an id, `release_view`
//! consumes it, and releasing the same id twice is reported as
//! `DoubleRelease` instead of corrupting the tracked state.
//!
//! This surface is synchronous and same-thread by contract (it routes
//! through the borrow tracker, not the lock manager), matching how host
//! bindings call into native code. Accesses through the registry are
//! serialized on its internal table lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::borrow_tracker::BorrowTicket;
use crate::error::AccessError;
use crate::handle::{AccessMode, BufferValue, Element, MemoryHandle};
use crate::heap::HostHeap;
use crate::scope::{View, ViewMut};

/// Opaque identifier of an open view. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(u64);

struct OpenView {
    handle: MemoryHandle,
    mode: AccessMode,
    ticket: BorrowTicket,
}

/// Table of open views for a host-binding surface.
pub struct ViewRegistry {
    heap: Arc<HostHeap>,
    open: Mutex<HashMap<ViewId, OpenView>>,
    next_id: AtomicU64,
}

impl ViewRegistry {
    pub fn new(heap: Arc<HostHeap>) -> Self {
        Self {
            heap,
            open: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Normalize a host buffer value, acquire a borrow ticket for it, and
    /// register the open view.
    ///
    /// Fails with `OutOfBounds` if the value's declared range exceeds the
    /// backing allocation's current capacity, and with `Busy` on a borrow
    /// conflict. Nothing is registered on failure.
    pub fn acquire_view(
        &self,
        value: &BufferValue,
        mode: AccessMode,
    ) -> Result<ViewId, AccessError> {
        let handle = MemoryHandle::from_value(&self.heap, value)?;
        let alloc = self.heap.resolve(handle.backing())?;

        let ticket = BorrowTicket::acquire(alloc, mode)?;

        // Authoritative bounds check, now that the ticket pins capacity.
        handle.validate(ticket.allocation().capacity())?;

        let id = ViewId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.open.lock().insert(
            id,
            OpenView {
                handle,
                mode,
                ticket,
            },
        );

        log::trace!("view {:?} opened ({:?}) on {}", id, mode, handle.backing());

        Ok(id)
    }

    /// Release an open view. Releasing an id that is not open — because
    /// it was already released — is a `DoubleRelease`.
    pub fn release_view(&self, id: ViewId) -> Result<(), AccessError> {
        match self.open.lock().remove(&id) {
            Some(open) => {
                log::trace!("view {:?} released on {}", id, open.handle.backing());
                open.ticket.release();
                Ok(())
            }
            None => Err(AccessError::DoubleRelease),
        }
    }

    /// The handle behind an open view.
    pub fn handle(&self, id: ViewId) -> Result<MemoryHandle, AccessError> {
        self.open
            .lock()
            .get(&id)
            .map(|open| open.handle)
            .ok_or(AccessError::Detached)
    }

    /// Run `body` with a read accessor over an open view.
    pub fn with_view<E, R>(
        &self,
        id: ViewId,
        body: impl FnOnce(View<'_, E>) -> R,
    ) -> Result<R, AccessError>
    where
        E: Element,
    {
        let open_table = self.open.lock();
        let open = open_table.get(&id).ok_or(AccessError::Detached)?;

        crate::scope::read_open(open.handle, open.ticket.allocation(), body)
    }

    /// Run `body` with a write accessor over an open view. Requires the
    /// view to have been acquired with `AccessMode::Write`.
    pub fn with_view_mut<E, R>(
        &self,
        id: ViewId,
        body: impl FnOnce(ViewMut<'_, E>) -> R,
    ) -> Result<R, AccessError>
    where
        E: Element,
    {
        let open_table = self.open.lock();
        let open = open_table.get(&id).ok_or(AccessError::Detached)?;

        if open.mode != AccessMode::Write {
            return Err(AccessError::ReadOnly);
        }

        crate::scope::write_open(open.handle, open.ticket.allocation(), body)
    }

    /// Read one element through an open view.
    pub fn read<E: Element>(&self, id: ViewId, index: usize) -> Result<E, AccessError> {
        self.with_view(id, |view: View<'_, E>| view.get(index))?
    }

    /// Write one element through an open view.
    pub fn write<E: Element>(&self, id: ViewId, index: usize, value: E) -> Result<(), AccessError> {
        self.with_view_mut(id, |mut view: ViewMut<'_, E>| view.set(index, value))?
    }

    /// Number of currently open views. Diagnostics only.
    pub fn open_count(&self) -> usize {
        self.open.lock().len()
    }
}
