//! Bounded ranges for the storage cell's counters.
//!
//! The share, headroom, and live-size counters are deliberately narrow:
//! together they pack into a single machine word of the cell header, and
//! arithmetic on them is always checked against these bounds, never
//! wrapping.

/// Maximum number of live bytes in a single buffer.
pub const MAX_SIZE: usize = u32::MAX as usize;

/// Maximum spare headroom carried by a single cell, ahead of the next
/// in-place growth.
pub const MAX_PREALLOCATED: usize = u16::MAX as usize;

/// Maximum number of handles and iterators sharing one cell.
pub const MAX_SHARES: u16 = u16::MAX;

/// Narrow `val` to the live-size range.
#[inline]
pub(crate) fn to_size(val: usize) -> Option<u32> {
    if val <= MAX_SIZE {
        Some(val as u32)
    } else {
        None
    }
}
