//! Memory handles: bounds-described references into host allocations.
//!
//! A handle carries `{backing, byte_offset, byte_length, element_stride}`
//! and nothing else — in particular no address. The physical location of
//! the bytes is re-resolved from the backing id on every acquisition,
//! because the host may grow or relocate the allocation between calls.
//!
//! Host-side buffer values are duck-typed; they arrive at the boundary as
//! a tagged [`BufferValue`] and are normalized to a single handle shape
//! before entering the arbitration core.

use crate::error::AccessError;
use crate::heap::{BackingId, HostHeap};

/// Requested access mode at the host boundary.
///
/// `Read` maps to a shared grant, `Write` to an exclusive grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// A host buffer-like value, as seen at the native boundary.
///
/// The host hands out several shapes over the same storage: a whole
/// buffer, a typed window with an element stride, or a raw byte buffer.
/// All of them normalize to a [`MemoryHandle`] via
/// [`MemoryHandle::from_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferValue {
    /// The whole allocation, viewed as bytes.
    ArrayBuffer { backing: BackingId },
    /// A typed window: `byte_length` bytes starting at `byte_offset`,
    /// interpreted as elements of `stride` bytes each.
    TypedView {
        backing: BackingId,
        byte_offset: usize,
        byte_length: usize,
        stride: usize,
    },
    /// A raw byte buffer over the whole allocation.
    RawBuffer { backing: BackingId },
}

/// A validated, bounds-described reference into a backing allocation.
///
/// A handle is only a description; it is not memory-safe on its own.
/// Reads and writes go through an access scope, which re-validates the
/// handle against the allocation's *current* capacity and pairs the
/// bounds check with the aliasing check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHandle {
    backing: BackingId,
    byte_offset: usize,
    byte_length: usize,
    element_stride: usize,
}

impl MemoryHandle {
    /// Normalize a host buffer value into a handle.
    ///
    /// Whole-buffer shapes take the allocation's current capacity as their
    /// length. Typed views are checked for stride alignment and for
    /// fitting inside the current capacity. The capacity check here is a
    /// fast-fail convenience: it is repeated under a ticket at every
    /// acquisition, which is the check that actually counts.
    pub fn from_value(heap: &HostHeap, value: &BufferValue) -> Result<Self, AccessError> {
        match *value {
            BufferValue::ArrayBuffer { backing } | BufferValue::RawBuffer { backing } => {
                let capacity = heap.capacity_hint(backing)?;
                Ok(Self {
                    backing,
                    byte_offset: 0,
                    byte_length: capacity,
                    element_stride: 1,
                })
            }
            BufferValue::TypedView {
                backing,
                byte_offset,
                byte_length,
                stride,
            } => {
                if stride == 0 || byte_length % stride != 0 {
                    return Err(AccessError::MisalignedView {
                        length: byte_length,
                        stride,
                    });
                }

                let handle = Self {
                    backing,
                    byte_offset,
                    byte_length,
                    element_stride: stride,
                };

                handle.validate(heap.capacity_hint(backing)?)?;

                Ok(handle)
            }
        }
    }

    pub fn backing(&self) -> BackingId {
        self.backing
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    pub fn element_stride(&self) -> usize {
        self.element_stride
    }

    /// Number of whole elements in the view.
    pub fn element_count(&self) -> usize {
        self.byte_length / self.element_stride
    }

    /// Check the handle's range against a capacity observed *while a
    /// ticket is held*. This is the authoritative bounds check.
    pub(crate) fn validate(&self, capacity: usize) -> Result<(), AccessError> {
        let end = self.byte_offset.checked_add(self.byte_length);

        match end {
            Some(end) if end <= capacity => Ok(()),
            _ => Err(AccessError::OutOfBounds {
                offset: self.byte_offset,
                length: self.byte_length,
                capacity,
            }),
        }
    }
}

/// An element type a typed view can be read and written as.
///
/// Elements use native endianness, matching the host's typed-array
/// semantics on the same machine.
pub trait Element: Copy {
    /// Size of one element in bytes; must equal the view's stride.
    const STRIDE: usize;

    /// Decode one element from exactly `STRIDE` bytes.
    fn read_ne(bytes: &[u8]) -> Self;

    /// Encode one element into exactly `STRIDE` bytes.
    fn write_ne(self, out: &mut [u8]);
}

macro_rules! impl_element {
    ($($typ:ty),+ $(,)?) => {
        $(
            impl Element for $typ {
                const STRIDE: usize = std::mem::size_of::<$typ>();

                fn read_ne(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$typ>()];
                    raw.copy_from_slice(&bytes[..Self::STRIDE]);
                    <$typ>::from_ne_bytes(raw)
                }

                fn write_ne(self, out: &mut [u8]) {
                    out[..Self::STRIDE].copy_from_slice(&self.to_ne_bytes());
                }
            }
        )+
    };
}

impl_element!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);
