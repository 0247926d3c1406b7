//! Error taxonomy for buffer access arbitration.
//!
//! Every variant describes a refused access. Refusal always happens
//! *before* any byte of the backing allocation is touched; there is no
//! partial read or write to roll back.

use thiserror::Error;

/// An access request that the arbitration layer refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessError {
    /// The requested view range exceeds the backing allocation's current
    /// capacity. Checked at every acquisition, not just at handle
    /// construction, so a host-side shrink is caught on the next access.
    #[error("view range {offset}+{length} exceeds backing capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        length: usize,
        capacity: usize,
    },

    /// An element index fell outside an already-acquired view.
    #[error("element index {index} out of bounds for view of {len} elements")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A typed view's byte length is not a multiple of its element stride.
    #[error("view length {length} is not a multiple of element stride {stride}")]
    MisalignedView { length: usize, stride: usize },

    /// A view was opened with an element type whose stride does not match
    /// the stride the handle was constructed with.
    #[error("view has element stride {view_stride}, requested element has stride {element_stride}")]
    ElementMismatch {
        view_stride: usize,
        element_stride: usize,
    },

    /// A same-thread borrow conflict. The conflicting holder is on the
    /// current call stack, so blocking would deadlock; this is surfaced
    /// immediately as a logic error in the caller.
    #[error("buffer is already borrowed in a conflicting mode")]
    Busy,

    /// A non-blocking lock probe found the buffer unavailable. The caller
    /// decides whether to retry, block, or give up.
    #[error("lock unavailable without blocking")]
    WouldBlock,

    /// A ticket was released more than once. The tracked state no longer
    /// reflects reality; debug builds additionally assert on this.
    #[error("access ticket released more than once")]
    DoubleRelease,

    /// The backing allocation has been reclaimed by the host, or the view
    /// id no longer refers to an open view.
    #[error("backing allocation has been reclaimed")]
    Detached,

    /// A write was attempted through a view acquired for reading.
    #[error("view was acquired read-only")]
    ReadOnly,
}
