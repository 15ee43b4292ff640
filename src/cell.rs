//! The shared storage cell behind buffer handles and iterators.

use alloc_crate::boxed::Box;
use alloc_crate::format;
use core::ptr::{self, NonNull};

use crate::capacity;
use crate::error::{BufferError, ErrorKind};
use crate::manager::StorageManager;

/// The reference counted storage record shared by one or more handles.
///
/// Cells are heap allocated and counted by hand through a deliberately
/// narrow, checked counter that never wraps. All access goes through
/// `NonNull<StorageCell>` holders confined to one thread of control; the
/// holders (`Buffer`, `BufIter`) drive the share/release protocol below.
///
/// Bookkeeping invariants: `size + preall` equals the allocated capacity
/// for owning cells; the address is null only when an owning cell holds no
/// storage at all.
pub(crate) struct StorageCell {
    pub(crate) shares: u16,
    pub(crate) preall: u16,
    pub(crate) size: u32,
    pub(crate) address: *mut u8,
    pub(crate) manager: &'static StorageManager,
}

impl StorageCell {
    /// Allocate a fresh cell holding one reference, to be adopted by the
    /// creating handle.
    pub(crate) fn create(
        manager: &'static StorageManager,
        preall: u16,
        size: u32,
        address: *mut u8,
    ) -> NonNull<StorageCell> {
        NonNull::from(Box::leak(Box::new(StorageCell {
            shares: 1,
            preall,
            size,
            address,
            manager,
        })))
    }

    /// Live size plus headroom: the allocated capacity of an owning cell.
    #[inline]
    pub(crate) fn total(&self) -> usize {
        self.size as usize + self.preall as usize
    }

    /// Checked share-count increment; `false` when the counter is
    /// saturated and the caller must fork instead.
    pub(crate) fn try_share(&mut self) -> bool {
        match self.shares.checked_add(1) {
            Some(shares) => {
                self.shares = shares;
                true
            }
            None => false,
        }
    }

    /// Request fresh storage without touching the size/headroom
    /// bookkeeping. `None` when the manager cannot allocate, the request
    /// exceeds the size bound, or the allocator is exhausted.
    pub(crate) fn try_allocate_raw(&self, bytes: usize) -> Option<NonNull<u8>> {
        if !self.manager.can_allocate() || bytes > capacity::MAX_SIZE {
            return None;
        }
        self.manager.allocate(bytes)
    }

    /// Release the current storage without touching the bookkeeping.
    /// `false` when the manager does not own its memory.
    pub(crate) fn try_deallocate_raw(&mut self) -> bool {
        if !self.manager.can_allocate() {
            return false;
        }
        if let Some(address) = NonNull::new(self.address) {
            unsafe { self.manager.deallocate(address, self.total()) };
        }
        self.address = ptr::null_mut();
        true
    }

    /// Bind this cell to `bytes` of fresh storage, resetting the headroom.
    /// The previous address is not released; callers use this on cells
    /// that hold no storage yet.
    pub(crate) fn try_allocate(&mut self, bytes: usize) -> bool {
        let Some(size) = capacity::to_size(bytes) else {
            return false;
        };
        let Some(address) = self.try_allocate_raw(bytes) else {
            return false;
        };
        self.address = address.as_ptr();
        self.size = size;
        self.preall = 0;
        true
    }

    /// Build a private copy of the cell for a single holder, leaving the
    /// original cell's counter untouched.
    ///
    /// An owning cell gets fresh storage with the live bytes copied over
    /// and the size/headroom split preserved. Borrowed and static cells
    /// re-reference the same external memory; they never need a private
    /// copy.
    fn fork(cell: NonNull<StorageCell>) -> Result<NonNull<StorageCell>, BufferError> {
        let (manager, preall, size, address, total) = {
            let cell = unsafe { cell.as_ref() };
            (
                cell.manager,
                cell.preall,
                cell.size,
                cell.address,
                cell.total(),
            )
        };
        let new_address = if manager.can_allocate() && total > 0 {
            let Some(fresh) = manager.allocate(total) else {
                return Err(BufferError::new(
                    ErrorKind::AllocationFailure,
                    "detach",
                    format!("bytes={total}"),
                ));
            };
            unsafe { copy_bytes(address, fresh.as_ptr(), size as usize) };
            fresh.as_ptr()
        } else {
            address
        };
        Ok(StorageCell::create(manager, preall, size, new_address))
    }

    /// Duplicate a handle reference: share the cell, or fork a private
    /// copy when the counter is saturated. Handle copies never observably
    /// fail from the bounded counter, at the cost of an unexpected
    /// allocation in that rare case.
    ///
    /// On the fork path the new holder never took a share, so the
    /// original cell's counter is left untouched.
    pub(crate) fn share_or_detach(
        slot: &mut Option<NonNull<StorageCell>>,
    ) -> Result<(), BufferError> {
        if let Some(cell) = slot.as_mut() {
            if !unsafe { cell.as_mut() }.try_share() {
                *cell = Self::fork(*cell)?;
            }
        }
        Ok(())
    }

    /// The copy-on-write fork point: when the cell is shared, move this
    /// share-owning reference onto a private cell, releasing its share of
    /// the original.
    pub(crate) fn detach(slot: &mut NonNull<StorageCell>) -> Result<(), BufferError> {
        if unsafe { slot.as_ref() }.shares <= 1 {
            return Ok(());
        }
        let fork = Self::fork(*slot)?;
        let mut old = Some(*slot);
        Self::release(&mut old);
        *slot = fork;
        Ok(())
    }

    /// Drop one reference. On the 1 → 0 transition the cell is destroyed
    /// and owned storage returned to its manager. Clears the slot.
    pub(crate) fn release(slot: &mut Option<NonNull<StorageCell>>) {
        let Some(ptr) = slot.take() else {
            return;
        };
        let shares = unsafe { (*ptr.as_ptr()).shares };
        if shares <= 1 {
            let cell = unsafe { Box::from_raw(ptr.as_ptr()) };
            if cell.manager.can_allocate() {
                if let Some(address) = NonNull::new(cell.address) {
                    unsafe { cell.manager.deallocate(address, cell.total()) };
                }
            }
        } else {
            unsafe { (*ptr.as_ptr()).shares = shares - 1 };
        }
    }

    /// Reassign a slot: release the current cell and adopt `newcell`,
    /// taking over its creation reference. The single primitive behind
    /// every cell replacement performed by the mutating operations.
    pub(crate) fn change(slot: &mut Option<NonNull<StorageCell>>, newcell: NonNull<StorageCell>) {
        Self::release(slot);
        *slot = Some(newcell);
    }
}

/// Copy `len` bytes between non-overlapping regions, tolerating null or
/// dangling pointers for zero-length copies.
///
/// # Safety
///
/// For `len > 0` both pointers must be valid for `len` bytes and the
/// regions must not overlap.
#[inline]
pub(crate) unsafe fn copy_bytes(src: *const u8, dst: *mut u8, len: usize) {
    if len > 0 {
        ptr::copy_nonoverlapping(src, dst, len);
    }
}

/// Copy `len` bytes between possibly overlapping regions.
///
/// # Safety
///
/// For `len > 0` both pointers must be valid for `len` bytes.
#[inline]
pub(crate) unsafe fn move_bytes(src: *const u8, dst: *mut u8, len: usize) {
    if len > 0 {
        ptr::copy(src, dst, len);
    }
}

#[cfg(test)]
mod tests {
    use super::StorageCell;
    use crate::capacity::MAX_SHARES;
    use crate::manager::{HEAP, STATIC};
    use core::ptr;

    #[test]
    fn share_and_release_bookkeeping() {
        let mut slot = Some(StorageCell::create(&HEAP, 0, 0, ptr::null_mut()));
        StorageCell::share_or_detach(&mut slot).unwrap();
        let cell = slot.unwrap();
        assert_eq!(unsafe { cell.as_ref() }.shares, 2);
        let mut second = Some(cell);
        StorageCell::release(&mut second);
        assert_eq!(unsafe { cell.as_ref() }.shares, 1);
        StorageCell::release(&mut slot);
        assert!(slot.is_none());
    }

    #[test]
    fn release_destroys_storageless_cell() {
        // The 1 -> 0 transition destroys the cell even when it never
        // held any storage.
        let mut slot = Some(StorageCell::create(&HEAP, 0, 0, ptr::null_mut()));
        StorageCell::release(&mut slot);
        assert!(slot.is_none());
    }

    #[test]
    fn detach_forks_shared_owned_cell() {
        let mut slot = Some(StorageCell::create(&HEAP, 0, 0, ptr::null_mut()));
        {
            let cell = unsafe { slot.as_mut().unwrap().as_mut() };
            assert!(cell.try_allocate(4));
            unsafe { cell.address.write_bytes(0x7E, 4) };
        }
        StorageCell::share_or_detach(&mut slot).unwrap();
        let mut other = slot;
        let original = other.unwrap();
        StorageCell::detach(other.as_mut().unwrap()).unwrap();
        let forked = other.unwrap();
        assert_ne!(original, forked);
        let fork = unsafe { forked.as_ref() };
        assert_eq!(fork.shares, 1);
        assert_eq!(fork.size, 4);
        assert_eq!(unsafe { *fork.address }, 0x7E);
        assert_eq!(unsafe { original.as_ref() }.shares, 1);
        StorageCell::release(&mut other);
        let mut first = Some(original);
        StorageCell::release(&mut first);
    }

    #[test]
    fn detach_re_references_external_memory() {
        static DATA: [u8; 4] = [1, 2, 3, 4];
        let mut slot = Some(StorageCell::create(
            &STATIC,
            0,
            4,
            DATA.as_ptr() as *mut u8,
        ));
        StorageCell::share_or_detach(&mut slot).unwrap();
        let original = slot.unwrap();
        let mut other = Some(original);
        StorageCell::detach(other.as_mut().unwrap()).unwrap();
        let fork = other.unwrap();
        assert_ne!(original, fork);
        assert_eq!(unsafe { fork.as_ref() }.address, DATA.as_ptr() as *mut u8);
        StorageCell::release(&mut other);
        let mut first = Some(original);
        StorageCell::release(&mut first);
    }

    #[test]
    fn share_saturates_at_bound() {
        let mut slot = Some(StorageCell::create(&HEAP, 0, 0, ptr::null_mut()));
        {
            let cell = unsafe { slot.as_mut().unwrap().as_mut() };
            cell.shares = MAX_SHARES;
            assert!(!cell.try_share());
            assert_eq!(cell.shares, MAX_SHARES);
            cell.shares = 1;
        }
        StorageCell::release(&mut slot);
    }
}
