//! A segregated-free-list heap allocator with boundary-tag coalescing.
//!
//! The heap manages one contiguous, upward-growing byte region. Every byte
//! between the region start and its break belongs to exactly one block:
//!
//! ```text
//! low                                                              high
//! ┌──────────────────┬──────┬─────────┬─────────┬─────┬─────────┬──────┐
//! │ prologue         │ end  │ block   │ block   │ ... │ block   │ epi- │
//! │ (13 list heads)  │ mark │         │         │     │         │logue │
//! └──────────────────┴──────┴─────────┴─────────┴─────┴─────────┴──────┘
//! ```
//!
//! - Every block carries a size/allocated header; free blocks repeat it in a
//!   footer so the previous block can be found in O(1) when coalescing.
//! - Free blocks are kept on one of [`NUM_CLASSES`] intrusive doubly linked
//!   lists, selected by size. The links live in the free block's payload.
//! - Allocation scans the class of the request and then every larger class,
//!   taking the first block that fits, and splits off any remainder of at
//!   least [`MIN_BLOCK_SIZE`] bytes.
//! - Releasing a block merges it with free physical neighbors immediately,
//!   so no two adjacent blocks are ever free.
//! - When nothing fits, the heap grows by the amount the free tail of the
//!   heap is short of, but at least by the configured chunk size.
//!
//! # Usage
//!
//! ```rust
//! use segheap::{ArenaRegion, Heap};
//!
//! let mut heap = Heap::new(ArenaRegion::with_capacity(1 << 16)).unwrap();
//! let ptr = heap.allocate(100).unwrap();
//! heap.payload_mut(ptr).unwrap()[..5].copy_from_slice(b"hello");
//!
//! let ptr = heap.reallocate(ptr, 400).unwrap();
//! assert_eq!(&heap.payload(ptr).unwrap()[..5], b"hello");
//!
//! heap.release(ptr);
//! heap.check_heap("example");
//! ```
//!
//! Pointers are [`HeapPtr`] offsets into the region rather than raw
//! addresses. [`LockedHeap`] adapts a heap to [`core::alloc::GlobalAlloc`]
//! for use as a global allocator.

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub use self::{
    block::{ALIGNMENT, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, OVERHEAD},
    global::LockedHeap,
    heap::{Heap, HeapConfig, HeapPtr, InitError},
    region::{ArenaRegion, BrkRegion, GrowError, HeapRegion, REGION_ALIGN},
    size_class::{NUM_CLASSES, SizeClass},
    stats::HeapStats,
    validate::{HeapCorruption, Violation},
};

mod block;
mod coalesce;
mod fit;
mod free_list;
pub mod global;
mod heap;
pub mod region;
mod size_class;
mod stats;
mod validate;
