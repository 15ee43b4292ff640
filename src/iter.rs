//! Random access iteration over a buffer's shared cell.

use alloc_crate::format;
use alloc_crate::string::String;
use core::fmt;
use core::ptr::NonNull;

use crate::cell::StorageCell;
use crate::error::{BufferError, ErrorKind};

/// A random access cursor over a buffer's bytes.
///
/// The iterator holds its own share of the storage cell, so it stays valid
/// for as long as the cell lives, independent of the `Buffer` handle that
/// created it. The position ranges over `[0, size]`, where `size` is the
/// end sentinel.
///
/// Two iterators are comparable, and their distance well defined, only
/// when they reference the identical cell.
pub struct BufIter {
    core: Option<NonNull<StorageCell>>,
    index: u32,
}

impl BufIter {
    /// Take a share of `core` and position the cursor at `index`.
    ///
    /// Fails when the cell's share counter is saturated: an iterator must
    /// reference the identical cell to stay comparable, so forking is not
    /// an option here.
    pub(crate) fn new(
        mut core: Option<NonNull<StorageCell>>,
        index: u32,
    ) -> Result<Self, BufferError> {
        if let Some(cell) = core.as_mut() {
            if !unsafe { cell.as_mut() }.try_share() {
                return Err(BufferError::new(
                    ErrorKind::CapacityOverflow,
                    "iter",
                    String::from("share counter saturated"),
                ));
            }
        }
        Ok(Self { core, index })
    }

    #[inline]
    fn cell(&self) -> Option<&StorageCell> {
        self.core.as_ref().map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Whether this iterator references exactly the given cell.
    pub(crate) fn references(&self, core: Option<NonNull<StorageCell>>) -> bool {
        self.core == core
    }

    /// Current position.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// The end sentinel position: the live size of the referenced cell.
    pub fn max_index(&self) -> usize {
        self.cell().map_or(0, |cell| cell.size as usize)
    }

    /// Duplicate the cursor onto the identical cell.
    ///
    /// Fails when the cell's share counter is saturated.
    pub fn try_clone(&self) -> Result<Self, BufferError> {
        Self::new(self.core, self.index).map_err(|err| err.trace("try_clone", ""))
    }

    /// Read the byte under the cursor.
    pub fn value(&self) -> Result<u8, BufferError> {
        let Some(cell) = self.cell() else {
            return Err(BufferError::new(
                ErrorKind::InvalidIterator,
                "value",
                String::from("no cell"),
            ));
        };
        if self.index >= cell.size {
            return Err(BufferError::new(
                ErrorKind::InvalidIterator,
                "value",
                format!("index={} size={}", self.index, cell.size),
            ));
        }
        Ok(unsafe { *cell.address.add(self.index as usize) })
    }

    /// Write the byte under the cursor. Requires a mutable manager; the
    /// write lands in the shared cell.
    pub fn set_value(&mut self, value: u8) -> Result<(), BufferError> {
        let Some(cell) = self.cell() else {
            return Err(BufferError::new(
                ErrorKind::InvalidIterator,
                "set_value",
                String::from("no cell"),
            ));
        };
        if !cell.manager.can_mutate() {
            return Err(BufferError::new(
                ErrorKind::PolicyViolation,
                "set_value",
                format!("manager={} is read-only", cell.manager.name()),
            ));
        }
        if self.index >= cell.size {
            return Err(BufferError::new(
                ErrorKind::InvalidIterator,
                "set_value",
                format!("index={} size={}", self.index, cell.size),
            ));
        }
        unsafe { *cell.address.add(self.index as usize) = value };
        Ok(())
    }

    fn checked_target(&self, amount: i64, op: &'static str) -> Result<u32, BufferError> {
        let Some(cell) = self.cell() else {
            return Err(BufferError::new(
                ErrorKind::InvalidIterator,
                op,
                String::from("no cell"),
            ));
        };
        let target = self.index as i64 + amount;
        if target > cell.size as i64 {
            return Err(BufferError::new(
                ErrorKind::InvalidIterator,
                op,
                format!("amount={amount} would step past the end ({})", cell.size),
            ));
        }
        if target < 0 {
            return Err(BufferError::new(
                ErrorKind::InvalidIterator,
                op,
                format!("amount={amount} would step before the begin"),
            ));
        }
        Ok(target as u32)
    }

    /// A cursor stepped by `amount`; negative amounts step backwards.
    ///
    /// The resulting position must stay within `[0, size]`.
    pub fn try_step(&self, amount: i64) -> Result<Self, BufferError> {
        let target = self.checked_target(amount, "try_step")?;
        Self::new(self.core, target)
    }

    /// Step this cursor by `amount` in place.
    pub fn try_seek(&mut self, amount: i64) -> Result<&mut Self, BufferError> {
        self.index = self.checked_target(amount, "try_seek")?;
        Ok(self)
    }

    /// Step forward one position, returning a cursor at the previous
    /// position. An end cursor cannot advance.
    pub fn try_advance(&mut self) -> Result<Self, BufferError> {
        let Some(cell) = self.cell() else {
            return Err(BufferError::new(
                ErrorKind::InvalidIterator,
                "try_advance",
                String::from("no cell"),
            ));
        };
        if self.index >= cell.size {
            return Err(BufferError::new(
                ErrorKind::InvalidIterator,
                "try_advance",
                String::from("cannot advance the end cursor"),
            ));
        }
        let previous = Self::new(self.core, self.index)?;
        self.index += 1;
        Ok(previous)
    }

    /// Step backward one position, returning a cursor at the previous
    /// position. A begin cursor cannot retreat.
    pub fn try_retreat(&mut self) -> Result<Self, BufferError> {
        if self.core.is_none() {
            return Err(BufferError::new(
                ErrorKind::InvalidIterator,
                "try_retreat",
                String::from("no cell"),
            ));
        }
        if self.index == 0 {
            return Err(BufferError::new(
                ErrorKind::InvalidIterator,
                "try_retreat",
                String::from("cannot retreat the begin cursor"),
            ));
        }
        let previous = Self::new(self.core, self.index)?;
        self.index -= 1;
        Ok(previous)
    }

    /// Distance between two cursors over the identical cell.
    pub fn try_distance(&self, other: &BufIter) -> Result<i64, BufferError> {
        match (self.core, other.core) {
            (Some(a), Some(b)) if a == b => Ok(self.index as i64 - other.index as i64),
            _ => Err(BufferError::new(
                ErrorKind::InvalidIterator,
                "try_distance",
                format!("{self:?} and {other:?} reference different cells"),
            )),
        }
    }
}

impl Iterator for BufIter {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let cell = self.cell()?;
        if self.index >= cell.size {
            return None;
        }
        let byte = unsafe { *cell.address.add(self.index as usize) };
        self.index += 1;
        Some(byte)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.max_index().saturating_sub(self.index());
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BufIter {}

impl Drop for BufIter {
    fn drop(&mut self) {
        StorageCell::release(&mut self.core);
    }
}

impl PartialEq for BufIter {
    /// Cursors are equal when they reference the identical cell at the
    /// same position.
    fn eq(&self, other: &Self) -> bool {
        self.core == other.core && self.index == other.index
    }
}

impl Eq for BufIter {}

impl fmt::Debug for BufIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufIter")
            .field("index", &self.index)
            .field("max_index", &self.max_index())
            .finish()
    }
}
