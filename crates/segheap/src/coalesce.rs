//! Boundary-tag coalescing and heap growth.
//!
//! Coalescing runs eagerly on every release and every growth, so no two
//! physically adjacent blocks are ever free at the same time. The previous
//! block is found in O(1) through the footer word right before a block.

use dataview::DataView;
use snafu::OptionExt as _;

use crate::{
    Heap,
    block::{Block, DWORD, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, Tag, WORD},
    region::{GrowError, HeapRegion, TooLargeSnafu},
    size_class::Prologue,
};

impl Prologue {
    /// Merges a newly freed block with its free physical neighbors and
    /// enqueues the result.
    ///
    /// `block` must carry free tags and must not be on any list. Returns the
    /// merged block, which starts at the previous block when that one was
    /// free.
    pub(crate) fn coalesce(self, mem: &mut DataView, block: Block) -> Block {
        let prev_free = !block.prev_tag(mem).allocated;
        let next = block.next(mem);
        let next_free = !next.is_allocated(mem);

        let mut start = block;
        let mut size = block.size(mem);
        if next_free {
            self.dequeue(mem, next);
            size += next.size(mem);
        }
        if prev_free {
            let prev = block.prev(mem);
            self.dequeue(mem, prev);
            size += prev.size(mem);
            start = prev;
        }

        start.set_tags(mem, Tag::free(size));
        self.enqueue(mem, start);
        start
    }
}

impl<R> Heap<R>
where
    R: HeapRegion,
{
    /// Grows the heap by at least `bytes` and returns the new free block
    /// after coalescing it with a free heap tail.
    ///
    /// The old epilogue becomes the header of the new block and a fresh
    /// epilogue is written at the new top. On failure nothing is modified.
    pub(crate) fn extend(&mut self, bytes: usize) -> Result<Block, GrowError> {
        let heap_size = self.region.high() - self.prologue.low();
        let size = bytes
            .max(MIN_BLOCK_SIZE)
            .checked_next_multiple_of(DWORD)
            .filter(|&size| {
                heap_size
                    .checked_add(size)
                    .is_some_and(|total| total <= MAX_BLOCK_SIZE)
            })
            .context(TooLargeSnafu { requested: bytes })?;

        let old_high = self.region.grow(size)?;
        let mem = DataView::from_mut(self.region.bytes_mut());
        let block = Block::at(old_high - WORD);
        block.set_tags(mem, Tag::free(size));
        block.next(mem).set_header(mem, Tag::END);
        Ok(self.prologue.coalesce(mem, block))
    }

    /// Size of the free block that ends the heap, or zero when the last
    /// block is allocated.
    ///
    /// A growth that will merge with this block only has to supply the
    /// shortfall.
    pub(crate) fn tail_free_size(&self) -> usize {
        let tail = self.epilogue().prev_tag(self.mem());
        if tail.allocated { 0 } else { tail.size }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use alloc::{vec, vec::Vec};

    use super::*;
    use crate::{ArenaRegion, HeapConfig, size_class::SizeClass};

    const PROLOGUE: Prologue = Prologue::new(0);

    /// Lays out blocks back to back; `true` marks a free, enqueued block.
    fn with_blocks<F>(layout: &[(usize, bool)], test_fn: F)
    where
        F: FnOnce(&mut DataView, &[Block]),
    {
        let mut bytes = vec![0x11u8; 4096];
        let mem = DataView::from_mut(&mut bytes[..]);
        PROLOGUE.format(mem);

        let mut block = PROLOGUE.first_block();
        let mut blocks = Vec::new();
        for &(size, free) in layout {
            if free {
                block.set_tags(mem, Tag::free(size));
                PROLOGUE.enqueue(mem, block);
            } else {
                block.set_tags(mem, Tag::allocated(size));
            }
            blocks.push(block);
            block = block.next(mem);
        }
        block.set_header(mem, Tag::END);
        test_fn(mem, &blocks);
    }

    fn free_blocks(mem: &DataView) -> Vec<Block> {
        SizeClass::all()
            .flat_map(|class| PROLOGUE.free_list(mem, class))
            .collect()
    }

    fn release(mem: &mut DataView, block: Block) -> Block {
        let size = block.size(mem);
        block.set_tags(mem, Tag::free(size));
        PROLOGUE.coalesce(mem, block)
    }

    #[test]
    fn test_coalesce_both_neighbors_allocated() {
        with_blocks(&[(32, false), (48, false), (32, false)], |mem, blocks| {
            let merged = release(mem, blocks[1]);
            assert_eq!(merged, blocks[1]);
            assert_eq!(merged.tag(mem), Tag::free(48));
            assert_eq!(free_blocks(mem), vec![blocks[1]]);
        });
    }

    #[test]
    fn test_coalesce_with_next() {
        with_blocks(&[(32, false), (48, false), (64, true), (32, false)], |mem, blocks| {
            let merged = release(mem, blocks[1]);
            assert_eq!(merged, blocks[1]);
            assert_eq!(merged.tag(mem), Tag::free(112));
            assert_eq!(merged.footer_tag(mem), Tag::free(112));
            assert_eq!(free_blocks(mem), vec![blocks[1]]);
        });
    }

    #[test]
    fn test_coalesce_with_prev() {
        with_blocks(&[(32, false), (64, true), (48, false), (32, false)], |mem, blocks| {
            let merged = release(mem, blocks[2]);
            assert_eq!(merged, blocks[1]);
            assert_eq!(merged.tag(mem), Tag::free(112));
            assert_eq!(merged.footer_tag(mem), Tag::free(112));
            assert_eq!(free_blocks(mem), vec![blocks[1]]);
        });
    }

    #[test]
    fn test_coalesce_with_both() {
        with_blocks(
            &[(32, false), (64, true), (48, false), (296, true), (32, false)],
            |mem, blocks| {
                let merged = release(mem, blocks[2]);
                assert_eq!(merged, blocks[1]);
                assert_eq!(merged.tag(mem), Tag::free(408));
                assert_eq!(merged.next(mem), blocks[4]);
                assert_eq!(free_blocks(mem), vec![blocks[1]]);
                assert_eq!(
                    PROLOGUE.free_list(mem, SizeClass::of(408)).collect::<Vec<_>>(),
                    vec![blocks[1]]
                );
            },
        );
    }

    #[test]
    fn test_coalesce_at_heap_edges() {
        with_blocks(&[(48, false), (48, false)], |mem, blocks| {
            release(mem, blocks[1]);
            let merged = release(mem, blocks[0]);
            assert_eq!(merged, PROLOGUE.first_block());
            assert_eq!(merged.tag(mem), Tag::free(96));
            assert_eq!(merged.next(mem).tag(mem), Tag::END);
        });
    }

    #[test]
    fn test_extend_merges_with_free_tail() {
        let mut heap = Heap::new(ArenaRegion::with_capacity(4096)).unwrap();
        let before = heap.region.high();
        assert_eq!(heap.tail_free_size(), 256);

        let block = heap.extend(100).unwrap();
        assert_eq!(block, heap.prologue.first_block());
        assert_eq!(heap.region.high(), before + 104);
        assert_eq!(heap.tail_free_size(), 360);
        assert!(heap.audit().is_empty());
    }

    #[test]
    fn test_extend_after_allocated_tail() {
        let config = HeapConfig::new().with_chunk_size(64);
        let mut heap = Heap::with_config(ArenaRegion::with_capacity(4096), config).unwrap();
        let ptr = heap.allocate(56).unwrap();
        assert_eq!(heap.tail_free_size(), 0);

        let block = heap.extend(40).unwrap();
        assert_eq!(block.payload(), ptr.offset() + 64);
        assert_eq!(heap.tail_free_size(), 40);
        assert!(heap.audit().is_empty());
    }

    #[test]
    fn test_extend_failure_leaves_heap_untouched() {
        let mut heap = Heap::new(ArenaRegion::with_capacity(512)).unwrap();
        let high = heap.region.high();
        let err = heap.extend(4096).unwrap_err();
        assert!(matches!(err, GrowError::Exhausted { .. }));
        assert_eq!(heap.region.high(), high);
        assert_eq!(heap.tail_free_size(), 256);
        assert!(heap.audit().is_empty());

        let err = heap.extend(usize::MAX).unwrap_err();
        assert!(matches!(err, GrowError::TooLarge { .. }));
    }
}
