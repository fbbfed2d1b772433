//! The allocator front end.
//!
//! [`Heap`] ties a [`HeapRegion`] to the prologue, free lists and placement
//! policy. Payloads are addressed by [`HeapPtr`], an offset into the region,
//! so the heap itself never hands out raw pointers.

use dataview::DataView;
use snafu::{Location, ResultExt as _, Snafu, ensure};

use crate::{
    block::{ALIGNMENT, Block, DWORD, MIN_BLOCK_SIZE, OVERHEAD, Tag, WORD},
    fit::adjust_size,
    region::{GrowError, HeapRegion},
    size_class::Prologue,
};

/// Offset of a payload inside the heap region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("{_0:#x}")]
pub struct HeapPtr(usize);

impl HeapPtr {
    #[must_use]
    pub const fn from_offset(offset: usize) -> Self {
        Self(offset)
    }

    /// Offset of the payload from the start of [`HeapRegion::bytes`].
    #[must_use]
    pub const fn offset(self) -> usize {
        self.0
    }
}

/// Tuning knobs of a [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    chunk_size: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapConfig {
    /// Default minimum growth of the heap, in bytes.
    pub const DEFAULT_CHUNK_SIZE: usize = 1 << 8;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets the minimum number of bytes requested from the region whenever
    /// the heap grows.
    ///
    /// The value is rounded up to the alignment unit and floored at
    /// [`MIN_BLOCK_SIZE`].
    #[must_use]
    pub const fn with_chunk_size(mut self, bytes: usize) -> Self {
        let bytes = if bytes < MIN_BLOCK_SIZE {
            MIN_BLOCK_SIZE
        } else {
            bytes
        };
        self.chunk_size = match bytes.checked_next_multiple_of(DWORD) {
            Some(bytes) => bytes,
            None => bytes & !(DWORD - 1),
        };
        self
    }

    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

/// Errors returned when a heap cannot be set up on a region.
#[derive(Debug, Snafu)]
pub enum InitError {
    #[snafu(display("heap region is not empty: {used} bytes already in use"))]
    RegionNotEmpty {
        used: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to format the heap"))]
    Format {
        source: GrowError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// A segregated-free-list heap over a growable region.
#[derive(Debug)]
pub struct Heap<R> {
    pub(crate) region: R,
    pub(crate) prologue: Prologue,
    config: HeapConfig,
}

impl<R> Heap<R>
where
    R: HeapRegion,
{
    /// Creates a heap with the default configuration.
    pub fn new(region: R) -> Result<Self, InitError> {
        Self::with_config(region, HeapConfig::default())
    }

    /// Formats an empty `region` and seeds it with one free chunk.
    pub fn with_config(region: R, config: HeapConfig) -> Result<Self, InitError> {
        let used = region.high() - region.low();
        ensure!(used == 0, RegionNotEmptySnafu { used });

        let mut heap = Self {
            prologue: Prologue::new(region.low()),
            region,
            config,
        };
        heap.format()?;
        Ok(heap)
    }

    fn format(&mut self) -> Result<(), InitError> {
        self.region
            .grow(Prologue::INITIAL_HEAP)
            .context(FormatSnafu)?;
        self.prologue.format(self.mem_mut());
        self.extend(self.config.chunk_size).context(FormatSnafu)?;
        Ok(())
    }

    /// Discards every allocation and formats the region again.
    ///
    /// All outstanding [`HeapPtr`]s become invalid.
    pub fn reset(&mut self) -> Result<(), InitError> {
        self.region.reset();
        self.format()
    }

    pub fn config(&self) -> HeapConfig {
        self.config
    }

    pub fn region(&self) -> &R {
        &self.region
    }

    /// Consumes the heap and returns its region.
    pub fn into_region(self) -> R {
        self.region
    }

    /// Allocates at least `size` bytes.
    ///
    /// Returns `None` for a zero-sized request, for a request larger than a
    /// block can hold, or when the region cannot grow far enough. A failed
    /// allocation leaves the heap unchanged.
    pub fn allocate(&mut self, size: usize) -> Option<HeapPtr> {
        let size = adjust_size(size)?;
        let block = if let Some(block) = self.prologue.find_fit(self.mem(), size) {
            block
        } else {
            let shortfall = size.saturating_sub(self.tail_free_size());
            self.extend(shortfall.max(self.config.chunk_size)).ok()?
        };
        self.prologue.place(self.mem_mut(), block, size);
        Some(HeapPtr(block.payload()))
    }

    /// Returns an allocation to the heap.
    ///
    /// `None`, pointers that do not name a live allocation of this heap and
    /// repeated releases are ignored.
    pub fn release(&mut self, ptr: impl Into<Option<HeapPtr>>) {
        let Some(block) = ptr.into().and_then(|ptr| self.live_block(ptr)) else {
            return;
        };
        let prologue = self.prologue;
        let mem = self.mem_mut();
        let size = block.size(mem);
        block.set_tags(mem, Tag::free(size));
        prologue.coalesce(mem, block);
    }

    /// Resizes an allocation by moving it.
    ///
    /// A `None` pointer behaves like [`allocate`](Self::allocate) and a zero
    /// `size` like [`release`](Self::release). Otherwise a new block is
    /// allocated, the common prefix copied and the old block released. On
    /// failure `None` is returned and the old allocation is left intact.
    pub fn reallocate(&mut self, ptr: impl Into<Option<HeapPtr>>, size: usize) -> Option<HeapPtr> {
        let ptr = ptr.into();
        if size == 0 {
            self.release(ptr);
            return None;
        }
        let Some(ptr) = ptr else {
            return self.allocate(size);
        };

        let old = self.live_block(ptr)?;
        let len = (old.size(self.mem()) - OVERHEAD).min(size);
        let new = self.allocate(size)?;
        self.region
            .bytes_mut()
            .copy_within(ptr.0..ptr.0 + len, new.0);
        self.release(ptr);
        Some(new)
    }

    /// Allocates a zero-filled array of `count` elements of `size` bytes.
    ///
    /// Returns `None` when the total size overflows.
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> Option<HeapPtr> {
        let bytes = count.checked_mul(size)?;
        let ptr = self.allocate(bytes)?;
        self.region.bytes_mut()[ptr.0..ptr.0 + bytes].fill(0);
        Some(ptr)
    }

    /// Number of payload bytes the allocation at `ptr` may use.
    ///
    /// This is at least the requested size and may be larger.
    pub fn usable_size(&self, ptr: HeapPtr) -> Option<usize> {
        let block = self.live_block(ptr)?;
        Some(block.size(self.mem()) - OVERHEAD)
    }

    pub fn payload(&self, ptr: HeapPtr) -> Option<&[u8]> {
        let len = self.usable_size(ptr)?;
        Some(&self.region.bytes()[ptr.0..ptr.0 + len])
    }

    pub fn payload_mut(&mut self, ptr: HeapPtr) -> Option<&mut [u8]> {
        let len = self.usable_size(ptr)?;
        Some(&mut self.region.bytes_mut()[ptr.0..ptr.0 + len])
    }

    /// Offset of the epilogue header, the last word of the heap.
    pub(crate) fn epilogue(&self) -> Block {
        Block::at(self.region.high() - WORD)
    }

    /// Resolves `ptr` to its block if it names a live allocation.
    fn live_block(&self, ptr: HeapPtr) -> Option<Block> {
        let block = Block::from_payload(ptr.0)?;
        let epilogue = self.epilogue();
        if block < self.prologue.first_block() || block >= epilogue {
            return None;
        }
        if !(ptr.0 - self.prologue.low()).is_multiple_of(ALIGNMENT) {
            return None;
        }

        let tag = block.tag(self.mem());
        let fits = tag.size >= MIN_BLOCK_SIZE
            && tag.size.is_multiple_of(DWORD)
            && block.offset() + tag.size <= epilogue.offset();
        (tag.allocated && fits).then_some(block)
    }

    pub(crate) fn mem(&self) -> &DataView {
        DataView::from(self.region.bytes())
    }

    pub(crate) fn mem_mut(&mut self) -> &mut DataView {
        DataView::from_mut(self.region.bytes_mut())
    }
}
