//! Runtime borrow and lock arbitration for host-managed binary buffers.
//!
//! A managed host runtime (garbage-collected, no borrow checker) hands
//! the same buffer memory to multiple native call sites, reentrantly and
//! across threads. This crate decides, per buffer, whether a requested
//! access may proceed, and guarantees release exactly once per grant —
//! reconstructing at runtime the soundness an ownership-based type
//! system provides statically.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Access Scope (with_view / with_locked_view)                │
//! │  ├── acquires a ticket, re-validates bounds                 │
//! │  ├── hands the body a bounds-checked View / ViewMut         │
//! │  └── releases on every exit path (RAII)                     │
//! └─────────────────────────────────────────────────────────────┘
//!                │                              │
//!                ▼                              ▼
//! ┌───────────────────────────┐  ┌───────────────────────────────┐
//! │  Borrow Tracker           │  │  Lock Manager                 │
//! │  ├── same-thread, atomic  │  │  ├── cross-thread, blocking   │
//! │  ├── Free/Shared/Excl     │  │  ├── reader/writer semantics  │
//! │  └── conflicts fail Busy  │  │  └── FIFO, writers not starved│
//! └───────────────────────────┘  └───────────────────────────────┘
//!                │                              │
//!                └──────────────┬───────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  HostHeap (backing allocations, keyed by BackingId)         │
//! │  ├── storage may grow, relocate, or be reclaimed            │
//! │  └── every access re-resolves; no address is ever cached    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The borrow tracker never blocks: a conflicting acquisition on the
//! same call stack is a bug in the native code, and blocking on it
//! would hang the thread forever. The lock manager is the opposite: a
//! genuine parking point for buffers shared across worker threads.

pub mod bridge;

mod borrow_tracker;
mod error;
mod handle;
mod heap;
mod lock_manager;
mod registry;
mod scope;

pub use borrow_tracker::{BorrowState, BorrowTicket};
pub use error::AccessError;
pub use handle::{AccessMode, BufferValue, Element, MemoryHandle};
pub use heap::{BackingId, HostHeap};
pub use lock_manager::LockTicket;
pub use registry::{ViewId, ViewRegistry};
pub use scope::{View, ViewMut};
