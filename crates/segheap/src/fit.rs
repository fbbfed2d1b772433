//! First-fit search and block placement.

use dataview::DataView;

use crate::{
    block::{Block, DWORD, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, OVERHEAD, Tag},
    size_class::{Prologue, SizeClass},
};

/// Rounds a payload request up to a block size.
///
/// Adds header and footer overhead, rounds to the alignment unit and floors
/// at [`MIN_BLOCK_SIZE`]. Returns `None` for zero or for requests that no
/// header can encode.
pub(crate) fn adjust_size(size: usize) -> Option<usize> {
    if size == 0 {
        return None;
    }
    if size <= MIN_BLOCK_SIZE - OVERHEAD {
        return Some(MIN_BLOCK_SIZE);
    }
    let size = size.checked_add(OVERHEAD)?.checked_next_multiple_of(DWORD)?;
    (size <= MAX_BLOCK_SIZE).then_some(size)
}

impl Prologue {
    /// Finds the first free block of at least `size` bytes.
    ///
    /// Scans the class `size` maps to, then every larger class in order.
    pub(crate) fn find_fit(self, mem: &DataView, size: usize) -> Option<Block> {
        SizeClass::of(size)
            .and_larger()
            .flat_map(|class| self.free_list(mem, class))
            .find(|block| block.size(mem) >= size)
    }

    /// Allocates `size` bytes at the start of the free `block`.
    ///
    /// The block is removed from its list. A remainder of at least
    /// [`MIN_BLOCK_SIZE`] is split off and enqueued as a new free block;
    /// anything smaller stays inside the allocation.
    pub(crate) fn place(self, mem: &mut DataView, block: Block, size: usize) {
        let block_size = block.size(mem);
        debug_assert!(block_size >= size, "placing into a block that is too small");
        self.dequeue(mem, block);

        let remainder = block_size - size;
        if remainder >= MIN_BLOCK_SIZE {
            block.set_tags(mem, Tag::allocated(size));
            let rest = block.next(mem);
            rest.set_tags(mem, Tag::free(remainder));
            self.enqueue(mem, rest);
        } else {
            block.set_tags(mem, Tag::allocated(block_size));
        }
    }
}
