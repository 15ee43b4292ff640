//! Support for memory allocation.

#[cfg(feature = "zeroize")]
use core::alloc::Layout;
#[cfg(feature = "zeroize")]
use core::ptr::NonNull;
#[cfg(feature = "zeroize")]
use core::slice;

pub use allocator_api2::alloc::{AllocError, Allocator, Global};

#[cfg(feature = "zeroize")]
use zeroize::Zeroize;

/// An allocator which allocates via `A` and zeroizes all buffers when they
/// are released.
#[cfg(feature = "zeroize")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroizingAlloc<A>(pub A);

#[cfg(feature = "zeroize")]
unsafe impl<A: Allocator> Allocator for ZeroizingAlloc<A> {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        self.0.allocate(layout)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() > 0 {
            let mem = slice::from_raw_parts_mut(ptr.as_ptr(), layout.size());
            mem.zeroize();
        }
        self.0.deallocate(ptr, layout)
    }
}

#[cfg(all(test, feature = "zeroize"))]
mod tests {
    use super::{AllocError, Allocator, Global, Layout, NonNull, ZeroizingAlloc};

    // Observes the state of released memory: the zeroizing wrapper scrubs
    // before forwarding the release to the inner allocator.
    struct Probe;

    unsafe impl Allocator for Probe {
        fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
            Global.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            let mem = core::slice::from_raw_parts(ptr.as_ptr(), layout.size());
            assert!(mem.iter().all(|&b| b == 0), "memory released unscrubbed");
            Global.deallocate(ptr, layout)
        }
    }

    #[test]
    fn zeroizing_alloc_scrubs_on_release() {
        let alloc = ZeroizingAlloc(Probe);
        let layout = Layout::array::<u8>(16).unwrap();
        let ptr = alloc.allocate(layout).unwrap().cast::<u8>();
        unsafe {
            ptr.as_ptr().write_bytes(0xA5, 16);
            alloc.deallocate(ptr, layout);
        }
    }
}
