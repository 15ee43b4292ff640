//! The public copy-on-write buffer handle.

use alloc_crate::format;
use core::cmp::Ordering;
use core::mem::ManuallyDrop;
use core::ops::Index;
use core::ptr::{self, NonNull};
use core::slice;

use const_default::ConstDefault;

use crate::capacity::{self, MAX_PREALLOCATED, MAX_SIZE};
use crate::cell::{copy_bytes, move_bytes, StorageCell};
use crate::error::{BufferError, ErrorKind};
use crate::iter::BufIter;
use crate::manager::{StorageManager, HEAP, STACK, STATIC};

#[cold]
#[inline(never)]
pub(crate) fn index_panic() -> ! {
    panic!("Invalid buffer index");
}

/// A copy-on-write byte buffer.
///
/// A `Buffer` is a thin handle onto a shared, reference counted storage
/// cell. Cloning shares the cell; every mutating operation decides per
/// call between an in-place fast path (exclusive ownership, sufficient
/// headroom) and a fork/reallocate slow path (shared ownership or
/// insufficient headroom). The cell's storage policy is described by a
/// [`StorageManager`]: heap buffers own their bytes, borrowed and static
/// buffers alias caller memory.
///
/// Handles are confined to one thread of control; the share counter is
/// plain bounded arithmetic, not atomic.
pub struct Buffer {
    pub(crate) core: Option<NonNull<StorageCell>>,
}

impl Buffer {
    /// Construct the empty buffer: no cell, no manager.
    pub const fn new() -> Self {
        Self { core: None }
    }

    #[inline]
    fn cell(&self) -> Option<&StorageCell> {
        self.core.as_ref().map(|ptr| unsafe { ptr.as_ref() })
    }

    #[inline]
    fn cell_mut(&mut self) -> Option<&mut StorageCell> {
        self.core.as_mut().map(|ptr| unsafe { ptr.as_mut() })
    }

    /// Allocate `size` bytes under `manager`. The manager must be able to
    /// allocate.
    pub fn try_sized(manager: &'static StorageManager, size: usize) -> Result<Self, BufferError> {
        if !manager.can_allocate() {
            return Err(BufferError::new(
                ErrorKind::PolicyViolation,
                "try_sized",
                format!("manager={} size={size}", manager.name()),
            ));
        }
        if size > MAX_SIZE {
            return Err(BufferError::new(
                ErrorKind::CapacityOverflow,
                "try_sized",
                format!("size={size}"),
            ));
        }
        let mut buf = Self {
            core: Some(StorageCell::create(manager, 0, 0, ptr::null_mut())),
        };
        if size > 0 && !buf.cell_mut().is_some_and(|cell| cell.try_allocate(size)) {
            return Err(BufferError::new(
                ErrorKind::AllocationFailure,
                "try_sized",
                format!("manager={} size={size}", manager.name()),
            ));
        }
        Ok(buf)
    }

    /// Bind a buffer onto caller memory under a non-owning manager.
    ///
    /// Managers which allocate are rejected: foreign memory must never be
    /// treated as owned.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `size` readable bytes (writable when the
    /// manager permits mutation) that remain valid for the lifetime of
    /// every handle and iterator referencing the resulting cell, and the
    /// memory must not be mutated elsewhere while any of them reads it.
    pub unsafe fn from_external(
        manager: &'static StorageManager,
        ptr: NonNull<u8>,
        size: usize,
    ) -> Result<Self, BufferError> {
        if manager.can_allocate() {
            return Err(BufferError::new(
                ErrorKind::PolicyViolation,
                "from_external",
                format!("manager={} owns its memory", manager.name()),
            ));
        }
        let Some(size) = capacity::to_size(size) else {
            return Err(BufferError::new(
                ErrorKind::CapacityOverflow,
                "from_external",
                format!("size={size}"),
            ));
        };
        Ok(Self {
            core: Some(StorageCell::create(manager, 0, size, ptr.as_ptr())),
        })
    }

    /// Allocate a heap buffer of `size` bytes.
    pub fn try_heap(size: usize) -> Result<Self, BufferError> {
        Self::try_sized(&HEAP, size).map_err(|err| err.trace("try_heap", format!("size={size}")))
    }

    /// Reserve heap headroom without populating it: the result has a size
    /// of zero and `size` preallocated bytes. Requests above the
    /// representable headroom are capped.
    pub fn try_heap_reserved(size: usize) -> Result<Self, BufferError> {
        let capped = size.min(MAX_PREALLOCATED);
        let mut buf = Self::try_sized(&HEAP, capped)
            .map_err(|err| err.trace("try_heap_reserved", format!("size={size}")))?;
        if let Some(cell) = buf.cell_mut() {
            cell.preall = cell.size as u16;
            cell.size = 0;
        }
        Ok(buf)
    }

    /// Allocate a heap buffer holding a copy of `data`.
    pub fn try_from_slice(data: &[u8]) -> Result<Self, BufferError> {
        let buf = Self::try_sized(&HEAP, data.len())
            .map_err(|err| err.trace("try_from_slice", format!("len={}", data.len())))?;
        if let Some(cell) = buf.cell() {
            unsafe { copy_bytes(data.as_ptr(), cell.address, data.len()) };
        }
        Ok(buf)
    }

    /// Bind a buffer onto caller-owned mutable memory (the borrowed
    /// "stack" policy) without copying.
    ///
    /// # Safety
    ///
    /// As for [`from_external`](Self::from_external).
    pub unsafe fn borrowed(ptr: NonNull<u8>, size: usize) -> Result<Self, BufferError> {
        Self::from_external(&STACK, ptr, size).map_err(|err| err.trace("borrowed", ""))
    }

    /// Bind a buffer onto static read-only data without copying.
    ///
    /// The slice outlives every possible cell and the static policy never
    /// permits writes, so no unsafe contract is involved.
    pub fn from_static(data: &'static [u8]) -> Self {
        let Some(size) = capacity::to_size(data.len()) else {
            BufferError::new(
                ErrorKind::CapacityOverflow,
                "from_static",
                format!("len={}", data.len()),
            )
            .panic()
        };
        Self {
            core: Some(StorageCell::create(
                &STATIC,
                0,
                size,
                data.as_ptr() as *mut u8,
            )),
        }
    }

    /// Raw pointer to the first live byte; null for an empty handle.
    pub fn as_ptr(&self) -> *const u8 {
        self.cell().map_or(ptr::null(), |cell| cell.address as *const u8)
    }

    /// Number of live bytes.
    pub fn size(&self) -> usize {
        self.cell().map_or(0, |cell| cell.size as usize)
    }

    /// Spare allocated bytes reserved ahead of the next in-place growth.
    pub fn preallocated(&self) -> usize {
        self.cell().map_or(0, |cell| cell.preall as usize)
    }

    /// Live size plus headroom.
    pub fn total_size(&self) -> usize {
        self.cell().map_or(0, |cell| cell.total())
    }

    /// The manager the current cell is bound to, if any.
    pub fn manager(&self) -> Option<&'static StorageManager> {
        self.cell().map(|cell| cell.manager)
    }

    /// Number of handles and iterators sharing the current cell.
    pub fn share_count(&self) -> u16 {
        self.cell().map_or(0, |cell| cell.shares)
    }

    /// Whether the handle holds no live bytes.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// View the live bytes as a slice.
    ///
    /// The slice must not be held across mutations made through another
    /// handle sharing the same cell.
    pub fn as_slice(&self) -> &[u8] {
        match self.cell() {
            Some(cell) if cell.size > 0 && !cell.address.is_null() => unsafe {
                slice::from_raw_parts(cell.address, cell.size as usize)
            },
            _ => &[],
        }
    }

    /// Read the byte at `index`.
    pub fn at(&self, index: usize) -> Result<u8, BufferError> {
        let Some(cell) = self.cell() else {
            return Err(BufferError::new(
                ErrorKind::EmptyBuffer,
                "at",
                format!("index={index}"),
            ));
        };
        if index >= cell.size as usize {
            return Err(BufferError::new(
                ErrorKind::InvalidRange,
                "at",
                format!("index={index} size={}", cell.size),
            ));
        }
        Ok(unsafe { *cell.address.add(index) })
    }

    /// Write the byte at `index`. Requires a mutable manager.
    ///
    /// The write lands in the shared cell and is visible to every handle
    /// sharing it; it does not fork.
    pub fn set(&mut self, index: usize, value: u8) -> Result<(), BufferError> {
        let Some(cell) = self.cell() else {
            return Err(BufferError::new(
                ErrorKind::EmptyBuffer,
                "set",
                format!("index={index}"),
            ));
        };
        if !cell.manager.can_mutate() {
            return Err(BufferError::new(
                ErrorKind::PolicyViolation,
                "set",
                format!("manager={} is read-only", cell.manager.name()),
            ));
        }
        if index >= cell.size as usize {
            return Err(BufferError::new(
                ErrorKind::InvalidRange,
                "set",
                format!("index={index} size={}", cell.size),
            ));
        }
        unsafe { *cell.address.add(index) = value };
        Ok(())
    }

    /// Lexicographic comparison: a shorter buffer sorts first; buffers of
    /// equal length sort by the first differing byte.
    pub fn compare(&self, other: &Buffer) -> Ordering {
        match self.size().cmp(&other.size()) {
            Ordering::Equal => self.as_slice().cmp(other.as_slice()),
            ordering => ordering,
        }
    }

    /// Iterator positioned at the first byte.
    ///
    /// Fails only when the cell's share counter is saturated.
    pub fn begin(&self) -> Result<BufIter, BufferError> {
        BufIter::new(self.core, 0)
    }

    /// Iterator positioned at the end sentinel.
    ///
    /// Fails only when the cell's share counter is saturated.
    pub fn end(&self) -> Result<BufIter, BufferError> {
        BufIter::new(self.core, self.cell().map_or(0, |cell| cell.size))
    }

    fn resolve_manager(
        &self,
        manager: Option<&'static StorageManager>,
        op: &'static str,
        detail: &str,
    ) -> Result<&'static StorageManager, BufferError> {
        manager.or_else(|| self.manager()).ok_or_else(|| {
            BufferError::new(
                ErrorKind::EmptyBuffer,
                op,
                format!("no suitable storage manager; {detail}"),
            )
        })
    }

    #[inline]
    fn into_core(self) -> Option<NonNull<StorageCell>> {
        let mut me = ManuallyDrop::new(self);
        me.core.take()
    }

    /// Deep copy under the buffer's own manager.
    pub fn try_to_owned(&self) -> Result<Buffer, BufferError> {
        self.to_owned_impl(None, "try_to_owned")
    }

    /// Deep copy under `manager`, which must allocate and mutate.
    pub fn try_to_owned_in(
        &self,
        manager: &'static StorageManager,
    ) -> Result<Buffer, BufferError> {
        self.to_owned_impl(Some(manager), "try_to_owned_in")
    }

    fn to_owned_impl(
        &self,
        manager: Option<&'static StorageManager>,
        op: &'static str,
    ) -> Result<Buffer, BufferError> {
        let Some(cell) = self.cell() else {
            return Ok(Buffer::new());
        };
        let manager = manager.unwrap_or(cell.manager);
        if !manager.can_allocate() {
            return Err(BufferError::new(
                ErrorKind::PolicyViolation,
                op,
                format!("manager={} cannot allocate", manager.name()),
            ));
        }
        let result = Buffer::try_sized(manager, cell.size as usize)
            .map_err(|err| err.trace(op, format!("manager={}", manager.name())))?;
        if let Some(rcell) = result.cell() {
            unsafe { copy_bytes(cell.address, rcell.address, cell.size as usize) };
        }
        Ok(result)
    }

    /// Rebind this handle to a deep copy of `other` under the handle's
    /// current manager. A no-op when `other` holds no data.
    pub fn try_clone_from(&mut self, other: &Buffer) -> Result<&mut Self, BufferError> {
        self.clone_from_impl(other, None, "try_clone_from")
    }

    /// Rebind this handle to a deep copy of `other` under `manager`.
    pub fn try_clone_from_in(
        &mut self,
        other: &Buffer,
        manager: &'static StorageManager,
    ) -> Result<&mut Self, BufferError> {
        self.clone_from_impl(other, Some(manager), "try_clone_from_in")
    }

    fn clone_from_impl(
        &mut self,
        other: &Buffer,
        manager: Option<&'static StorageManager>,
        op: &'static str,
    ) -> Result<&mut Self, BufferError> {
        let no_data = match other.cell() {
            None => true,
            Some(cell) => cell.address.is_null(),
        };
        if no_data {
            return Ok(self);
        }
        let manager =
            self.resolve_manager(manager, op, &format!("other.size={}", other.size()))?;
        let copy = other
            .to_owned_impl(Some(manager), op)
            .map_err(|err| err.trace(op, format!("manager={}", manager.name())))?;
        StorageCell::release(&mut self.core);
        self.core = copy.into_core();
        Ok(self)
    }

    /// Copy or alias the byte range `[start, end)` under the buffer's own
    /// manager.
    ///
    /// When the resolved manager cannot both allocate and mutate, the
    /// result is a zero-copy alias into the original memory: it shares the
    /// original's lifetime obligations rather than owning its bytes.
    /// Otherwise the range is deep copied.
    pub fn try_range(&self, start: usize, end: usize) -> Result<Buffer, BufferError> {
        self.range_impl(start, end, None, "try_range")
    }

    /// Copy or alias the byte range `[start, end)` under `manager`.
    pub fn try_range_in(
        &self,
        start: usize,
        end: usize,
        manager: &'static StorageManager,
    ) -> Result<Buffer, BufferError> {
        self.range_impl(start, end, Some(manager), "try_range_in")
    }

    /// Copy or alias the span between two iterators over this buffer's
    /// cell.
    pub fn try_range_between(
        &self,
        start: &BufIter,
        end: &BufIter,
    ) -> Result<Buffer, BufferError> {
        if !start.references(self.core) || !end.references(self.core) {
            return Err(BufferError::new(
                ErrorKind::InvalidIterator,
                "try_range_between",
                format!("start={start:?} end={end:?}"),
            ));
        }
        self.range_impl(start.index(), end.index(), None, "try_range_between")
    }

    fn range_impl(
        &self,
        start: usize,
        end: usize,
        manager: Option<&'static StorageManager>,
        op: &'static str,
    ) -> Result<Buffer, BufferError> {
        if end < start || end > self.size() {
            return Err(BufferError::new(
                ErrorKind::InvalidRange,
                op,
                format!("start={start} end={end} size={}", self.size()),
            ));
        }
        let Some(cell) = self.cell() else {
            return Ok(Buffer::new());
        };
        let manager = manager.unwrap_or(cell.manager);
        if !(manager.can_allocate() && manager.can_mutate()) {
            let address = if cell.address.is_null() {
                ptr::null_mut()
            } else {
                unsafe { cell.address.add(start) }
            };
            return Ok(Buffer {
                core: Some(StorageCell::create(
                    manager,
                    0,
                    (end - start) as u32,
                    address,
                )),
            });
        }
        let result = Buffer::try_sized(manager, end - start)
            .map_err(|err| err.trace(op, format!("start={start} end={end}")))?;
        if let Some(rcell) = result.cell() {
            unsafe { copy_bytes(cell.address.add(start), rcell.address, end - start) };
        }
        Ok(result)
    }

    /// Copying reversal of the whole buffer under its own manager.
    pub fn try_reversed(&self) -> Result<Buffer, BufferError> {
        self.reversed_impl(0, self.size(), None, "try_reversed")
    }

    /// Copying reversal of the whole buffer under `manager`.
    pub fn try_reversed_in(
        &self,
        manager: &'static StorageManager,
    ) -> Result<Buffer, BufferError> {
        self.reversed_impl(0, self.size(), Some(manager), "try_reversed_in")
    }

    /// Copying reversal of `[start, end)`; bytes outside the window are
    /// copied through unchanged.
    pub fn try_reversed_range(&self, start: usize, end: usize) -> Result<Buffer, BufferError> {
        self.reversed_impl(start, end, None, "try_reversed_range")
    }

    /// Copying reversal of `[start, end)` under `manager`.
    pub fn try_reversed_range_in(
        &self,
        start: usize,
        end: usize,
        manager: &'static StorageManager,
    ) -> Result<Buffer, BufferError> {
        self.reversed_impl(start, end, Some(manager), "try_reversed_range_in")
    }

    fn reversed_impl(
        &self,
        start: usize,
        end: usize,
        manager: Option<&'static StorageManager>,
        op: &'static str,
    ) -> Result<Buffer, BufferError> {
        if end < start || end > self.size() {
            return Err(BufferError::new(
                ErrorKind::InvalidRange,
                op,
                format!("start={start} end={end} size={}", self.size()),
            ));
        }
        let manager = self.resolve_manager(manager, op, &format!("start={start} end={end}"))?;
        let Some(cell) = self.cell() else {
            return Buffer::try_sized(manager, 0).map_err(|err| err.trace(op, ""));
        };
        let size = cell.size as usize;
        let result = Buffer::try_sized(manager, size)
            .map_err(|err| err.trace(op, format!("start={start} end={end}")))?;
        if let Some(rcell) = result.cell() {
            unsafe {
                copy_bytes(cell.address, rcell.address, start);
                copy_bytes(cell.address.add(end), rcell.address.add(end), size - end);
                for offset in 0..end - start {
                    *rcell.address.add(start + offset) = *cell.address.add(end - 1 - offset);
                }
            }
        }
        Ok(result)
    }

    /// Reverse the whole buffer in place.
    pub fn try_reverse(&mut self) -> Result<&mut Self, BufferError> {
        let size = self.size();
        self.reverse_impl(0, size, "try_reverse")
    }

    /// Reverse `[start, end)` in place.
    ///
    /// A shared cell is forked into a private reversed copy first; an
    /// exclusive cell is swapped pairwise in place.
    pub fn try_reverse_range(
        &mut self,
        start: usize,
        end: usize,
    ) -> Result<&mut Self, BufferError> {
        self.reverse_impl(start, end, "try_reverse_range")
    }

    fn reverse_impl(
        &mut self,
        start: usize,
        end: usize,
        op: &'static str,
    ) -> Result<&mut Self, BufferError> {
        if end < start || end > self.size() {
            return Err(BufferError::new(
                ErrorKind::InvalidRange,
                op,
                format!("start={start} end={end} size={}", self.size()),
            ));
        }
        let Some(cell) = self.cell() else {
            return Ok(self);
        };
        let manager = cell.manager;
        if !manager.can_mutate() {
            return Err(BufferError::new(
                ErrorKind::PolicyViolation,
                op,
                format!("manager={} is read-only", manager.name()),
            ));
        }
        if cell.shares > 1 {
            // A borrowed fork would re-reference the same memory, so the
            // swap below would still be visible to the other holders.
            if !manager.can_allocate() {
                return Err(BufferError::new(
                    ErrorKind::PolicyViolation,
                    op,
                    format!("manager={} cannot fork a shared cell", manager.name()),
                ));
            }
            if let Some(core) = self.core.as_mut() {
                StorageCell::detach(core)
                    .map_err(|err| err.trace(op, format!("start={start} end={end}")))?;
            }
        }
        let Some(cell) = self.cell() else {
            return Ok(self);
        };
        let address = cell.address;
        let halfway = start + (end - start) / 2;
        let mut back = end;
        for front in start..halfway {
            back -= 1;
            unsafe {
                let left = *address.add(front);
                *address.add(front) = *address.add(back);
                *address.add(back) = left;
            }
        }
        Ok(self)
    }

    /// Copy of this buffer with `value` inserted at `index`, under the
    /// buffer's own manager.
    pub fn try_inserted(&self, index: usize, value: &Buffer) -> Result<Buffer, BufferError> {
        self.inserted_impl(index, value, None, "try_inserted")
    }

    /// Copy of this buffer with `value` inserted at `index`, under
    /// `manager`.
    pub fn try_inserted_in(
        &self,
        index: usize,
        value: &Buffer,
        manager: &'static StorageManager,
    ) -> Result<Buffer, BufferError> {
        self.inserted_impl(index, value, Some(manager), "try_inserted_in")
    }

    /// Copy of this buffer with `value` appended, under the buffer's own
    /// manager.
    pub fn try_appended(&self, value: &Buffer) -> Result<Buffer, BufferError> {
        self.inserted_impl(self.size(), value, None, "try_appended")
    }

    /// Copy of this buffer with `value` appended, under `manager`.
    pub fn try_appended_in(
        &self,
        value: &Buffer,
        manager: &'static StorageManager,
    ) -> Result<Buffer, BufferError> {
        self.inserted_impl(self.size(), value, Some(manager), "try_appended_in")
    }

    fn inserted_impl(
        &self,
        index: usize,
        value: &Buffer,
        manager: Option<&'static StorageManager>,
        op: &'static str,
    ) -> Result<Buffer, BufferError> {
        let size = self.size();
        let vsize = value.size();
        if index > size {
            return Err(BufferError::new(
                ErrorKind::InvalidRange,
                op,
                format!("index={index} size={size}"),
            ));
        }
        let manager =
            self.resolve_manager(manager, op, &format!("index={index} value.size={vsize}"))?;
        let Some(total) = size.checked_add(vsize).filter(|&total| total <= MAX_SIZE) else {
            return Err(BufferError::new(
                ErrorKind::CapacityOverflow,
                op,
                format!("size={size} value.size={vsize}"),
            ));
        };
        let result = Buffer::try_sized(manager, total)
            .map_err(|err| err.trace(op, format!("index={index} value.size={vsize}")))?;
        if let Some(rcell) = result.cell() {
            unsafe {
                if let Some(cell) = self.cell() {
                    copy_bytes(cell.address, rcell.address, index);
                    copy_bytes(
                        cell.address.add(index),
                        rcell.address.add(index + vsize),
                        size - index,
                    );
                }
                if let Some(vcell) = value.cell() {
                    copy_bytes(vcell.address, rcell.address.add(index), vsize);
                }
            }
        }
        Ok(result)
    }

    /// Insert `value` at `index` in place.
    ///
    /// With exclusive ownership and headroom of at least `value.size()`
    /// the suffix is shifted right within the existing storage; otherwise
    /// the cell is reallocated at the new total, which requires an
    /// allocating manager.
    pub fn try_insert(&mut self, index: usize, value: &Buffer) -> Result<&mut Self, BufferError> {
        self.insert_impl(index, value, "try_insert")
    }

    /// Append `value` in place.
    pub fn try_append(&mut self, value: &Buffer) -> Result<&mut Self, BufferError> {
        let size = self.size();
        self.insert_impl(size, value, "try_append")
    }

    fn insert_impl(
        &mut self,
        index: usize,
        value: &Buffer,
        op: &'static str,
    ) -> Result<&mut Self, BufferError> {
        if self.core.is_none() {
            return self.clone_from_impl(value, None, op);
        }
        let vsize = value.size();
        let vaddress = value
            .cell()
            .map_or(ptr::null(), |cell| cell.address as *const u8);
        let Some(cell) = self.cell_mut() else {
            return Ok(self);
        };
        let size = cell.size as usize;
        if index > size {
            return Err(BufferError::new(
                ErrorKind::InvalidRange,
                op,
                format!("index={index} size={size}"),
            ));
        }
        let manager = cell.manager;
        if !manager.can_mutate() {
            return Err(BufferError::new(
                ErrorKind::PolicyViolation,
                op,
                format!("manager={} is read-only", manager.name()),
            ));
        }
        let Some(total) = size.checked_add(vsize).filter(|&total| total <= MAX_SIZE) else {
            return Err(BufferError::new(
                ErrorKind::CapacityOverflow,
                op,
                format!("size={size} value.size={vsize}"),
            ));
        };
        if vsize == 0 {
            return Ok(self);
        }
        if cell.shares > 1 || vsize > cell.preall as usize {
            if !manager.can_allocate() {
                return Err(BufferError::new(
                    ErrorKind::PolicyViolation,
                    op,
                    format!(
                        "manager={} has insufficient storage for {total} bytes",
                        manager.name()
                    ),
                ));
            }
            let Some(fresh) = manager.allocate(total) else {
                return Err(BufferError::new(
                    ErrorKind::AllocationFailure,
                    op,
                    format!("bytes={total}"),
                ));
            };
            let address = cell.address;
            unsafe {
                copy_bytes(address, fresh.as_ptr(), index);
                copy_bytes(vaddress, fresh.as_ptr().add(index), vsize);
                copy_bytes(
                    address.add(index),
                    fresh.as_ptr().add(index + vsize),
                    size - index,
                );
            }
            let newcell = StorageCell::create(manager, 0, total as u32, fresh.as_ptr());
            StorageCell::change(&mut self.core, newcell);
        } else {
            unsafe {
                move_bytes(
                    cell.address.add(index),
                    cell.address.add(index + vsize),
                    size - index,
                );
                copy_bytes(vaddress, cell.address.add(index), vsize);
            }
            cell.size += vsize as u32;
            cell.preall -= vsize as u16;
        }
        Ok(self)
    }

    /// Copy of this buffer with `[start, end)` removed, under the
    /// buffer's own manager.
    pub fn try_erased(&self, start: usize, end: usize) -> Result<Buffer, BufferError> {
        self.erased_impl(start, end, None, "try_erased")
    }

    /// Copy of this buffer with `[start, end)` removed, under `manager`.
    pub fn try_erased_in(
        &self,
        start: usize,
        end: usize,
        manager: &'static StorageManager,
    ) -> Result<Buffer, BufferError> {
        self.erased_impl(start, end, Some(manager), "try_erased_in")
    }

    fn erased_impl(
        &self,
        start: usize,
        end: usize,
        manager: Option<&'static StorageManager>,
        op: &'static str,
    ) -> Result<Buffer, BufferError> {
        let size = self.size();
        if end < start || end > size {
            return Err(BufferError::new(
                ErrorKind::InvalidRange,
                op,
                format!("start={start} end={end} size={size}"),
            ));
        }
        let manager = self.resolve_manager(manager, op, &format!("start={start} end={end}"))?;
        let result = Buffer::try_sized(manager, size - (end - start))
            .map_err(|err| err.trace(op, format!("start={start} end={end}")))?;
        if let (Some(cell), Some(rcell)) = (self.cell(), result.cell()) {
            unsafe {
                copy_bytes(cell.address, rcell.address, start);
                copy_bytes(cell.address.add(end), rcell.address.add(start), size - end);
            }
        }
        Ok(result)
    }

    /// Remove `[start, end)` in place.
    ///
    /// With exclusive ownership, and as long as the reclaimed span still
    /// fits the headroom bound, the tail is shifted left within the
    /// existing storage; otherwise the cell is reallocated at the reduced
    /// size.
    pub fn try_erase(&mut self, start: usize, end: usize) -> Result<&mut Self, BufferError> {
        let size = self.size();
        if end < start || end > size {
            return Err(BufferError::new(
                ErrorKind::InvalidRange,
                "try_erase",
                format!("start={start} end={end} size={size}"),
            ));
        }
        let Some(cell) = self.cell_mut() else {
            return Ok(self);
        };
        let manager = cell.manager;
        if !manager.can_mutate() {
            return Err(BufferError::new(
                ErrorKind::PolicyViolation,
                "try_erase",
                format!("manager={} is read-only", manager.name()),
            ));
        }
        let span = end - start;
        let remainder = size - span;
        if cell.shares > 1 || cell.preall as usize + span > MAX_PREALLOCATED {
            if !manager.can_allocate() {
                return Err(BufferError::new(
                    ErrorKind::PolicyViolation,
                    "try_erase",
                    format!("manager={} cannot reallocate", manager.name()),
                ));
            }
            let address = cell.address;
            let fresh = if remainder > 0 {
                let Some(fresh) = manager.allocate(remainder) else {
                    return Err(BufferError::new(
                        ErrorKind::AllocationFailure,
                        "try_erase",
                        format!("bytes={remainder}"),
                    ));
                };
                unsafe {
                    copy_bytes(address, fresh.as_ptr(), start);
                    copy_bytes(address.add(end), fresh.as_ptr().add(start), size - end);
                }
                fresh.as_ptr()
            } else {
                ptr::null_mut()
            };
            let newcell = StorageCell::create(manager, 0, remainder as u32, fresh);
            StorageCell::change(&mut self.core, newcell);
        } else {
            unsafe {
                move_bytes(cell.address.add(end), cell.address.add(start), size - end);
            }
            cell.preall += span as u16;
            cell.size -= span as u32;
        }
        Ok(self)
    }

    /// Grow the headroom by `extra` bytes ahead of future inserts, under
    /// the buffer's own manager.
    ///
    /// The request silently caps so the total headroom stays within its
    /// bounded range.
    pub fn try_reserve(&mut self, extra: usize) -> Result<&mut Self, BufferError> {
        self.reserve_impl(extra, None, "try_reserve")
    }

    /// Grow the headroom by `extra` bytes under `manager`.
    pub fn try_reserve_in(
        &mut self,
        extra: usize,
        manager: &'static StorageManager,
    ) -> Result<&mut Self, BufferError> {
        self.reserve_impl(extra, Some(manager), "try_reserve_in")
    }

    fn reserve_impl(
        &mut self,
        extra: usize,
        manager: Option<&'static StorageManager>,
        op: &'static str,
    ) -> Result<&mut Self, BufferError> {
        let manager = self.resolve_manager(manager, op, &format!("extra={extra}"))?;
        if !(manager.can_allocate() && manager.can_mutate()) {
            return Err(BufferError::new(
                ErrorKind::PolicyViolation,
                op,
                format!("manager={} cannot allocate", manager.name()),
            ));
        }
        let capped = extra.min(MAX_PREALLOCATED - self.preallocated());
        if capped == 0 && self.core.is_some() {
            return Ok(self);
        }
        let exclusive_same_manager = self
            .cell()
            .is_some_and(|cell| cell.shares <= 1 && ptr::eq(cell.manager, manager));
        if exclusive_same_manager {
            let Some(cell) = self.cell_mut() else {
                return Ok(self);
            };
            let total = cell.total() + capped;
            let Some(fresh) = cell.try_allocate_raw(total) else {
                return Err(BufferError::new(
                    ErrorKind::AllocationFailure,
                    op,
                    format!("bytes={total}"),
                ));
            };
            unsafe { copy_bytes(cell.address, fresh.as_ptr(), cell.size as usize) };
            if !cell.try_deallocate_raw() {
                return Err(BufferError::new(
                    ErrorKind::AllocationFailure,
                    op,
                    format!("failed releasing {} bytes", cell.total()),
                ));
            }
            cell.address = fresh.as_ptr();
            cell.preall += capped as u16;
        } else {
            let size = self.size();
            let total = self.total_size() + capped;
            let newcell = if total == 0 {
                StorageCell::create(manager, 0, 0, ptr::null_mut())
            } else {
                let Some(fresh) = manager.allocate(total) else {
                    return Err(BufferError::new(
                        ErrorKind::AllocationFailure,
                        op,
                        format!("bytes={total}"),
                    ));
                };
                if let Some(cell) = self.cell() {
                    unsafe { copy_bytes(cell.address, fresh.as_ptr(), size) };
                }
                StorageCell::create(
                    manager,
                    (total - size) as u16,
                    size as u32,
                    fresh.as_ptr(),
                )
            };
            StorageCell::change(&mut self.core, newcell);
        }
        Ok(self)
    }
}

impl Clone for Buffer {
    /// Duplicate the handle, sharing the underlying cell. When the share
    /// counter is saturated the cell is forked instead, so cloning never
    /// fails from the bounded counter.
    fn clone(&self) -> Self {
        let mut core = self.core;
        if let Err(err) = StorageCell::share_or_detach(&mut core) {
            err.panic()
        }
        Self { core }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        StorageCell::release(&mut self.core);
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstDefault for Buffer {
    const DEFAULT: Self = Self::new();
}

impl Index<usize> for Buffer {
    type Output = u8;

    fn index(&self, index: usize) -> &u8 {
        match self.cell() {
            Some(cell) if index < cell.size as usize => unsafe { &*cell.address.add(index) },
            _ => index_panic(),
        }
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Buffer {}

impl PartialOrd for Buffer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Buffer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialEq<[u8]> for Buffer {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_slice() == other
    }
}

impl PartialEq<&[u8]> for Buffer {
    fn eq(&self, other: &&[u8]) -> bool {
        self.as_slice() == *other
    }
}
