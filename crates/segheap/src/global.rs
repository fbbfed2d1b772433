//! [`GlobalAlloc`] adapter.
//!
//! ```rust,ignore
//! use segheap::{LockedHeap, BrkRegion};
//!
//! static mut ARENA: [u8; 1 << 20] = [0; 1 << 20];
//!
//! #[global_allocator]
//! static ALLOCATOR: LockedHeap<BrkRegion<&'static mut [u8]>> = LockedHeap::empty();
//!
//! fn init() {
//!     let arena = unsafe { &mut *core::ptr::addr_of_mut!(ARENA) };
//!     ALLOCATOR.init(BrkRegion::new(&mut arena[..])).unwrap();
//! }
//! ```

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr,
};

use spin::{Mutex, MutexGuard};

use crate::{
    Heap, HeapPtr,
    block::ALIGNMENT,
    heap::InitError,
    region::HeapRegion,
};

/// A [`Heap`] behind a spin lock, usable as a global allocator.
///
/// Allocation fails until [`init`](Self::init) is called. Requests for an
/// alignment above [`ALIGNMENT`] always fail.
#[derive(Debug)]
pub struct LockedHeap<R> {
    inner: Mutex<Option<Heap<R>>>,
}

impl<R> Default for LockedHeap<R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<R> LockedHeap<R> {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Locks the heap for direct access.
    pub fn lock(&self) -> MutexGuard<'_, Option<Heap<R>>> {
        self.inner.lock()
    }
}

impl<R> LockedHeap<R>
where
    R: HeapRegion,
{
    /// Builds the heap on `region`, replacing any previous one.
    pub fn init(&self, region: R) -> Result<(), InitError> {
        let heap = Heap::new(region)?;
        *self.inner.lock() = Some(heap);
        Ok(())
    }
}

impl<R> Heap<R>
where
    R: HeapRegion,
{
    fn raw_address(&mut self, ptr: HeapPtr) -> *mut u8 {
        self.region
            .bytes_mut()
            .as_mut_ptr()
            .wrapping_add(ptr.offset())
    }

    fn ptr_from_raw(&self, raw: *mut u8) -> HeapPtr {
        let base = self.region.bytes().as_ptr().addr();
        HeapPtr::from_offset(raw.addr().wrapping_sub(base))
    }
}

fn supported(layout: Layout) -> bool {
    layout.align() <= ALIGNMENT
}

unsafe impl<R> GlobalAlloc for LockedHeap<R>
where
    R: HeapRegion + Send,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut inner = self.inner.lock();
        match inner.as_mut() {
            Some(heap) if supported(layout) => heap
                .allocate(layout.size())
                .map_or(ptr::null_mut(), |p| heap.raw_address(p)),
            _ => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(heap) = self.inner.lock().as_mut() {
            let ptr = heap.ptr_from_raw(ptr);
            heap.release(ptr);
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let mut inner = self.inner.lock();
        match inner.as_mut() {
            Some(heap) if supported(layout) => heap
                .allocate_zeroed(1, layout.size())
                .map_or(ptr::null_mut(), |p| heap.raw_address(p)),
            _ => ptr::null_mut(),
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let mut inner = self.inner.lock();
        match inner.as_mut() {
            Some(heap) if supported(layout) => {
                let old = heap.ptr_from_raw(ptr);
                heap.reallocate(old, new_size)
                    .map_or(ptr::null_mut(), |p| heap.raw_address(p))
            }
            _ => ptr::null_mut(),
        }
    }
}
