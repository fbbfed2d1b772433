//! Intrusive free lists, one per size class.
//!
//! A free block is linked into exactly one list through the `next`/`prev`
//! links stored in its own payload. Insertion is LIFO at the head and
//! removal only touches the block's two neighbors, so both are O(1). Lists
//! are not ordered by size or address.

use core::fmt;

use dataview::DataView;

use crate::{
    block::Block,
    size_class::{Prologue, SizeClass},
};

impl Prologue {
    /// Pushes a free block to the head of the list of its size class.
    ///
    /// The block's header must already hold its final size.
    pub(crate) fn enqueue(self, mem: &mut DataView, block: Block) {
        let head = self.head(SizeClass::of(block.size(mem)));
        let next = head.next_free(mem);

        block.set_next_free(mem, next);
        block.set_prev_free(mem, head);
        head.set_next_free(mem, block);
        if next != self.sentinel() {
            next.set_prev_free(mem, block);
        }
    }

    /// Unlinks a block from whatever list it is on.
    ///
    /// The block must currently be free and enqueued; this is not checked.
    pub(crate) fn dequeue(self, mem: &mut DataView, block: Block) {
        let prev = block.prev_free(mem);
        let next = block.next_free(mem);

        if next != self.sentinel() {
            next.set_prev_free(mem, prev);
        }
        prev.set_next_free(mem, next);
    }

    /// Iterates over the free list of `class` in list order.
    pub(crate) fn free_list(self, mem: &DataView, class: SizeClass) -> FreeList<'_> {
        FreeList {
            mem,
            cursor: self.head(class).next_free(mem),
            end: self.sentinel(),
        }
    }
}

/// Iterator over the blocks of one free list.
pub(crate) struct FreeList<'a> {
    mem: &'a DataView,
    cursor: Block,
    end: Block,
}

impl fmt::Debug for FreeList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeList")
            .field("cursor", &self.cursor)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

impl Iterator for FreeList<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == self.end {
            return None;
        }
        let block = self.cursor;
        self.cursor = block.next_free(self.mem);
        Some(block)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use alloc::{format, vec, vec::Vec};

    use super::*;
    use crate::block::Tag;

    const PROLOGUE: Prologue = Prologue::new(0);

    fn with_formatted_heap<F>(test_fn: F)
    where
        F: FnOnce(&mut DataView),
    {
        let mut bytes = vec![0x11u8; 4096];
        let mem = DataView::from_mut(&mut bytes[..]);
        PROLOGUE.format(mem);
        test_fn(mem);
    }

    /// Carves free blocks of the given sizes back to back after the prologue.
    fn carve(mem: &mut DataView, sizes: &[usize]) -> Vec<Block> {
        let mut block = PROLOGUE.first_block();
        let mut blocks = Vec::new();
        for &size in sizes {
            block.set_tags(mem, Tag::free(size));
            blocks.push(block);
            block = block.next(mem);
        }
        block.set_header(mem, Tag::END);
        blocks
    }

    fn list(mem: &DataView, class: usize) -> Vec<Block> {
        let class = SizeClass::all().nth(class).unwrap();
        PROLOGUE.free_list(mem, class).collect()
    }

    fn assert_symmetric(mem: &DataView, class: usize) {
        let class = SizeClass::all().nth(class).unwrap();
        let mut prev = PROLOGUE.head(class);
        for block in PROLOGUE.free_list(mem, class) {
            assert_eq!(block.prev_free(mem), prev);
            prev = block;
        }
    }

    #[test]
    fn test_free_list_debug_shows_cursor() {
        with_formatted_heap(|mem| {
            let class = SizeClass::all().next().unwrap();
            let list = PROLOGUE.free_list(mem, class);
            assert_eq!(
                format!("{list:?}"),
                "FreeList { cursor: Block(112), end: Block(112), .. }"
            );
        });
    }

    #[test]
    fn test_enqueue_is_lifo() {
        with_formatted_heap(|mem| {
            let blocks = carve(mem, &[32, 48, 64]);
            for &block in &blocks {
                PROLOGUE.enqueue(mem, block);
            }
            assert_eq!(list(mem, 0), vec![blocks[2], blocks[1], blocks[0]]);
            assert_symmetric(mem, 0);
        });
    }

    #[test]
    fn test_enqueue_selects_class_by_size() {
        with_formatted_heap(|mem| {
            let blocks = carve(mem, &[248, 256, 1032]);
            for &block in &blocks {
                PROLOGUE.enqueue(mem, block);
            }
            assert_eq!(list(mem, 0), vec![blocks[0]]);
            assert_eq!(list(mem, 1), vec![blocks[1]]);
            assert_eq!(list(mem, 2), vec![blocks[2]]);
            assert!(list(mem, 3).is_empty());
        });
    }

    #[test]
    fn test_dequeue_middle_head_and_tail() {
        with_formatted_heap(|mem| {
            let blocks = carve(mem, &[24, 24, 24, 24]);
            for &block in &blocks {
                PROLOGUE.enqueue(mem, block);
            }
            // list order: 3, 2, 1, 0
            PROLOGUE.dequeue(mem, blocks[2]);
            assert_eq!(list(mem, 0), vec![blocks[3], blocks[1], blocks[0]]);
            assert_symmetric(mem, 0);

            PROLOGUE.dequeue(mem, blocks[3]);
            assert_eq!(list(mem, 0), vec![blocks[1], blocks[0]]);
            assert_symmetric(mem, 0);

            PROLOGUE.dequeue(mem, blocks[0]);
            assert_eq!(list(mem, 0), vec![blocks[1]]);
            assert_symmetric(mem, 0);

            PROLOGUE.dequeue(mem, blocks[1]);
            assert!(list(mem, 0).is_empty());
            assert_eq!(PROLOGUE.head(SizeClass::of(24)).next_free(mem), PROLOGUE.sentinel());
        });
    }

    #[test]
    fn test_requeue_after_resize_moves_class() {
        with_formatted_heap(|mem| {
            let blocks = carve(mem, &[240]);
            PROLOGUE.enqueue(mem, blocks[0]);
            PROLOGUE.dequeue(mem, blocks[0]);
            blocks[0].set_tags(mem, Tag::free(264));
            PROLOGUE.enqueue(mem, blocks[0]);
            assert!(list(mem, 0).is_empty());
            assert_eq!(list(mem, 1), vec![blocks[0]]);
        });
    }
}
