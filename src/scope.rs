//! Access scopes: the only way call sites touch buffer bytes.
//!
//! A scope acquires the appropriate ticket (borrow tracker for
//! synchronous same-thread calls, lock manager for cross-thread calls),
//! re-validates the handle's bounds against the allocation's *current*
//! capacity, hands the body a bounds-checked accessor, and releases the
//! ticket on every exit path — normal return, early error, or panic.
//!
//! Accessors are lifetime-bound to the body closure. No raw address and
//! no accessor can escape the scope, which is what makes a released or
//! relocated buffer untouchable afterward.

use std::marker::PhantomData;

use crate::borrow_tracker::BorrowTicket;
use crate::error::AccessError;
use crate::handle::{AccessMode, Element, MemoryHandle};
use crate::heap::HostHeap;
use crate::lock_manager::LockTicket;

/// Bounds-checked read accessor over a typed view.
pub struct View<'a, E: Element> {
    bytes: &'a [u8],
    _elem: PhantomData<E>,
}

impl<'a, E: Element> View<'a, E> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            _elem: PhantomData,
        }
    }

    /// Number of elements in the view.
    pub fn len(&self) -> usize {
        self.bytes.len() / E::STRIDE
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read the element at `index`.
    pub fn get(&self, index: usize) -> Result<E, AccessError> {
        let len = self.len();

        if index >= len {
            return Err(AccessError::IndexOutOfBounds { index, len });
        }

        let at = index * E::STRIDE;
        Ok(E::read_ne(&self.bytes[at..at + E::STRIDE]))
    }

    /// The raw bytes of the view.
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }

    /// Copy all elements out, in index order.
    pub fn to_vec(&self) -> Vec<E> {
        (0..self.len())
            .map(|i| E::read_ne(&self.bytes[i * E::STRIDE..(i + 1) * E::STRIDE]))
            .collect()
    }
}

/// Bounds-checked read/write accessor over a typed view.
pub struct ViewMut<'a, E: Element> {
    bytes: &'a mut [u8],
    _elem: PhantomData<E>,
}

impl<'a, E: Element> ViewMut<'a, E> {
    fn new(bytes: &'a mut [u8]) -> Self {
        Self {
            bytes,
            _elem: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / E::STRIDE
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<E, AccessError> {
        let len = self.len();

        if index >= len {
            return Err(AccessError::IndexOutOfBounds { index, len });
        }

        let at = index * E::STRIDE;
        Ok(E::read_ne(&self.bytes[at..at + E::STRIDE]))
    }

    /// Write the element at `index`.
    pub fn set(&mut self, index: usize, value: E) -> Result<(), AccessError> {
        let len = self.len();

        if index >= len {
            return Err(AccessError::IndexOutOfBounds { index, len });
        }

        let at = index * E::STRIDE;
        value.write_ne(&mut self.bytes[at..at + E::STRIDE]);
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.bytes
    }

    /// Fill the view from a slice of elements, starting at index 0.
    pub fn copy_from(&mut self, values: &[E]) -> Result<(), AccessError> {
        let len = self.len();

        if values.len() > len {
            return Err(AccessError::IndexOutOfBounds {
                index: values.len() - 1,
                len,
            });
        }

        for (i, v) in values.iter().enumerate() {
            v.write_ne(&mut self.bytes[i * E::STRIDE..(i + 1) * E::STRIDE]);
        }

        Ok(())
    }
}

/// Which arbitration path a scope routes through.
enum ScopePath {
    /// Borrow tracker: synchronous, same-thread, fail-fast.
    Borrow,
    /// Lock manager: cross-thread, blocking.
    Locked,
    /// Lock manager, non-blocking probe.
    TryLocked,
}

fn element_check<E: Element>(handle: &MemoryHandle) -> Result<(), AccessError> {
    if handle.element_stride() != E::STRIDE {
        return Err(AccessError::ElementMismatch {
            view_stride: handle.element_stride(),
            element_stride: E::STRIDE,
        });
    }
    Ok(())
}

/// Acquire tickets for `handle`, run `body` with a read accessor.
fn read_scope<E, R>(
    heap: &HostHeap,
    handle: &MemoryHandle,
    path: ScopePath,
    body: impl FnOnce(View<'_, E>) -> R,
) -> Result<R, AccessError>
where
    E: Element,
{
    element_check::<E>(handle)?;

    let alloc = heap.resolve(handle.backing())?;

    // Ticket order matters: the lock (if any) is taken first, then the
    // borrow flag, so every byte of access is arbitrated by the borrow
    // state regardless of path. Both are RAII and release on unwind.
    let _lock: Option<LockTicket> = match path {
        ScopePath::Borrow => None,
        ScopePath::Locked => Some(LockTicket::acquire(alloc.clone(), AccessMode::Read)),
        ScopePath::TryLocked => Some(LockTicket::try_acquire(alloc.clone(), AccessMode::Read)?),
    };
    let _borrow = BorrowTicket::acquire(alloc.clone(), AccessMode::Read)?;

    // Bounds are validated only now, under the ticket, against the
    // capacity the host cannot change until the ticket is released.
    handle.validate(alloc.capacity())?;

    // SAFETY: a shared borrow ticket is held for `alloc` until this
    // function returns (or unwinds), so no exclusive access and no
    // resize/relocation can occur while `bytes` is live.
    let bytes = unsafe { alloc.bytes() };
    let window = &bytes[handle.byte_offset()..handle.byte_offset() + handle.byte_length()];

    Ok(body(View::new(window)))
}

/// Acquire tickets for `handle`, run `body` with a read/write accessor.
fn write_scope<E, R>(
    heap: &HostHeap,
    handle: &MemoryHandle,
    path: ScopePath,
    body: impl FnOnce(ViewMut<'_, E>) -> R,
) -> Result<R, AccessError>
where
    E: Element,
{
    element_check::<E>(handle)?;

    let alloc = heap.resolve(handle.backing())?;

    let _lock: Option<LockTicket> = match path {
        ScopePath::Borrow => None,
        ScopePath::Locked => Some(LockTicket::acquire(alloc.clone(), AccessMode::Write)),
        ScopePath::TryLocked => Some(LockTicket::try_acquire(alloc.clone(), AccessMode::Write)?),
    };
    let _borrow = BorrowTicket::acquire(alloc.clone(), AccessMode::Write)?;

    handle.validate(alloc.capacity())?;

    // SAFETY: an exclusive borrow ticket is held for `alloc` until this
    // function returns (or unwinds); the mutable slice is unique.
    let bytes = unsafe { alloc.bytes_mut() };
    let window = &mut bytes[handle.byte_offset()..handle.byte_offset() + handle.byte_length()];

    Ok(body(ViewMut::new(window)))
}

/// Read accessor over a view whose ticket is held elsewhere (the view
/// registry's table). The caller guarantees a live ticket for `alloc`.
pub(crate) fn read_open<E, R>(
    handle: MemoryHandle,
    alloc: &crate::heap::Allocation,
    body: impl FnOnce(View<'_, E>) -> R,
) -> Result<R, AccessError>
where
    E: Element,
{
    element_check::<E>(&handle)?;
    handle.validate(alloc.capacity())?;

    // SAFETY: the caller holds a borrow ticket for `alloc` for at least
    // the duration of this call; capacity cannot change under a ticket.
    let bytes = unsafe { alloc.bytes() };
    let window = &bytes[handle.byte_offset()..handle.byte_offset() + handle.byte_length()];

    Ok(body(View::new(window)))
}

/// Write accessor over a view whose *exclusive* ticket is held elsewhere.
pub(crate) fn write_open<E, R>(
    handle: MemoryHandle,
    alloc: &crate::heap::Allocation,
    body: impl FnOnce(ViewMut<'_, E>) -> R,
) -> Result<R, AccessError>
where
    E: Element,
{
    element_check::<E>(&handle)?;
    handle.validate(alloc.capacity())?;

    // SAFETY: the caller holds an exclusive borrow ticket for `alloc`
    // for at least the duration of this call.
    let bytes = unsafe { alloc.bytes_mut() };
    let window = &mut bytes[handle.byte_offset()..handle.byte_offset() + handle.byte_length()];

    Ok(body(ViewMut::new(window)))
}

impl HostHeap {
    /// Shared read access through the borrow tracker (same-thread,
    /// fail-fast). The ticket is released when `body` returns, errors,
    /// or panics.
    pub fn with_view<E, R>(
        &self,
        handle: &MemoryHandle,
        body: impl FnOnce(View<'_, E>) -> R,
    ) -> Result<R, AccessError>
    where
        E: Element,
    {
        read_scope(self, handle, ScopePath::Borrow, body)
    }

    /// Exclusive write access through the borrow tracker.
    pub fn with_view_mut<E, R>(
        &self,
        handle: &MemoryHandle,
        body: impl FnOnce(ViewMut<'_, E>) -> R,
    ) -> Result<R, AccessError>
    where
        E: Element,
    {
        write_scope(self, handle, ScopePath::Borrow, body)
    }

    /// Shared read access through the lock manager. Blocks until the
    /// lock is granted under FIFO order.
    pub fn with_locked_view<E, R>(
        &self,
        handle: &MemoryHandle,
        body: impl FnOnce(View<'_, E>) -> R,
    ) -> Result<R, AccessError>
    where
        E: Element,
    {
        read_scope(self, handle, ScopePath::Locked, body)
    }

    /// Exclusive write access through the lock manager. Blocks until all
    /// current holders release.
    pub fn with_locked_view_mut<E, R>(
        &self,
        handle: &MemoryHandle,
        body: impl FnOnce(ViewMut<'_, E>) -> R,
    ) -> Result<R, AccessError>
    where
        E: Element,
    {
        write_scope(self, handle, ScopePath::Locked, body)
    }

    /// Non-blocking variant of [`with_locked_view`](Self::with_locked_view);
    /// fails with `WouldBlock` instead of parking.
    pub fn try_locked_view<E, R>(
        &self,
        handle: &MemoryHandle,
        body: impl FnOnce(View<'_, E>) -> R,
    ) -> Result<R, AccessError>
    where
        E: Element,
    {
        read_scope(self, handle, ScopePath::TryLocked, body)
    }

    /// Non-blocking variant of
    /// [`with_locked_view_mut`](Self::with_locked_view_mut).
    pub fn try_locked_view_mut<E, R>(
        &self,
        handle: &MemoryHandle,
        body: impl FnOnce(ViewMut<'_, E>) -> R,
    ) -> Result<R, AccessError>
    where
        E: Element,
    {
        write_scope(self, handle, ScopePath::TryLocked, body)
    }
}
