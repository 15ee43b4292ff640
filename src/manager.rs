//! Storage-origin policies.
//!
//! A [`StorageManager`] describes what is legal for memory of a given
//! origin: whether fresh storage can be requested from it, and whether
//! bytes behind it may be written. Managers are immutable and referenced
//! by address; two managers are the same policy only if they are the same
//! instance.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

use crate::alloc::{Allocator, Global};

#[cfg(feature = "zeroize")]
use crate::alloc::ZeroizingAlloc;

/// The closed set of storage origins a buffer can be bound to.
///
/// Only `Owned` carries an allocator, so illegal combinations (such as
/// allocating into static storage) are unrepresentable.
#[derive(Copy, Clone)]
pub enum StoragePolicy {
    /// Unowned read-only data. Neither allocation nor mutation.
    Static,
    /// Caller-owned data. Mutation is allowed, allocation is unavailable.
    Borrowed,
    /// Self-owned data backed by the given allocator.
    Owned(&'static (dyn Allocator + Sync)),
}

impl fmt::Debug for StoragePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => f.write_str("Static"),
            Self::Borrowed => f.write_str("Borrowed"),
            Self::Owned(_) => f.write_str("Owned"),
        }
    }
}

/// An immutable descriptor of the operations legal for one storage origin.
pub struct StorageManager {
    name: &'static str,
    policy: StoragePolicy,
}

impl StorageManager {
    /// Create an owned-policy manager backed by `alloc`.
    pub const fn owned(name: &'static str, alloc: &'static (dyn Allocator + Sync)) -> Self {
        Self {
            name,
            policy: StoragePolicy::Owned(alloc),
        }
    }

    /// Create a borrowed-policy manager for caller-owned mutable data.
    pub const fn borrowed(name: &'static str) -> Self {
        Self {
            name,
            policy: StoragePolicy::Borrowed,
        }
    }

    /// Create a static-policy manager for unowned read-only data.
    pub const fn unowned(name: &'static str) -> Self {
        Self {
            name,
            policy: StoragePolicy::Static,
        }
    }

    /// Diagnostic label for this manager.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The storage policy.
    pub const fn policy(&self) -> StoragePolicy {
        self.policy
    }

    /// Whether this manager can request new storage.
    pub const fn can_allocate(&self) -> bool {
        matches!(self.policy, StoragePolicy::Owned(_))
    }

    /// Whether data behind this manager may be written through.
    pub const fn can_mutate(&self) -> bool {
        matches!(
            self.policy,
            StoragePolicy::Owned(_) | StoragePolicy::Borrowed
        )
    }

    /// Compact capability rendering: `m` allocates, `w` mutates.
    pub const fn capabilities(&self) -> &'static str {
        match self.policy {
            StoragePolicy::Static => "",
            StoragePolicy::Borrowed => "w",
            StoragePolicy::Owned(_) => "mw",
        }
    }

    /// Request `bytes` of storage from this manager.
    ///
    /// Returns `None` for non-owning policies or when the allocator is
    /// exhausted; callers gate on [`can_allocate`](Self::can_allocate)
    /// first rather than treating `None` as a policy signal.
    pub fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        let StoragePolicy::Owned(alloc) = self.policy else {
            return None;
        };
        let layout = Layout::array::<u8>(bytes).ok()?;
        alloc.allocate(layout).ok().map(|ptr| ptr.cast())
    }

    /// Release `bytes` of storage previously obtained from
    /// [`allocate`](Self::allocate). A no-op for non-owning policies.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate(bytes)` on this manager
    /// and not released since.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize) {
        if let StoragePolicy::Owned(alloc) = self.policy {
            let layout = Layout::from_size_align_unchecked(bytes, 1);
            alloc.deallocate(ptr, layout);
        }
    }
}

impl fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageManager")
            .field("name", &self.name)
            .field("flags", &self.capabilities())
            .finish()
    }
}

/// The unowned static-data policy: no allocation, no mutation.
pub static STATIC: StorageManager = StorageManager::unowned("static");

/// The caller-owned borrowed-data policy: mutation without allocation.
pub static STACK: StorageManager = StorageManager::borrowed("stack");

/// The self-owned heap policy backed by the global allocator.
pub static HEAP: StorageManager = StorageManager::owned("heap", &Global);

/// A heap policy which zeroizes released storage.
#[cfg(feature = "zeroize")]
pub static HEAP_ZEROIZING: StorageManager =
    StorageManager::owned("heap-zeroizing", &ZeroizingAlloc(Global));

#[cfg(test)]
mod tests {
    use super::{HEAP, STACK, STATIC};

    #[test]
    fn canonical_capabilities() {
        assert!(!STATIC.can_allocate());
        assert!(!STATIC.can_mutate());
        assert!(!STACK.can_allocate());
        assert!(STACK.can_mutate());
        assert!(HEAP.can_allocate());
        assert!(HEAP.can_mutate());
        assert_eq!(STATIC.capabilities(), "");
        assert_eq!(STACK.capabilities(), "w");
        assert_eq!(HEAP.capabilities(), "mw");
    }

    #[test]
    fn non_owning_policies_never_allocate() {
        assert!(STATIC.allocate(16).is_none());
        assert!(STACK.allocate(16).is_none());
    }

    #[test]
    fn heap_allocates_and_releases() {
        let ptr = HEAP.allocate(16).expect("allocation");
        unsafe { HEAP.deallocate(ptr, 16) };
    }
}
