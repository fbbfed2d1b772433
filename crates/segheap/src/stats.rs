//! Heap usage statistics.

use crate::{Heap, block::MIN_BLOCK_SIZE, region::HeapRegion};

/// A snapshot of heap usage, gathered by walking every block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes between the heap start and its break, including the prologue
    /// and the epilogue.
    pub heap_bytes: usize,
    pub allocated_blocks: usize,
    /// Total size of allocated blocks, headers and footers included.
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
}

impl<R> Heap<R>
where
    R: HeapRegion,
{
    /// Collects usage statistics.
    ///
    /// The walk stops early at a block whose size is implausible, so a
    /// corrupted heap yields partial numbers rather than a panic.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mem = self.mem();
        let epilogue = self.epilogue();
        let mut stats = HeapStats {
            heap_bytes: self.region.high() - self.prologue.low(),
            ..HeapStats::default()
        };

        let mut block = self.prologue.first_block();
        while block < epilogue {
            let tag = block.tag(mem);
            if tag.size < MIN_BLOCK_SIZE || block.offset() + tag.size > epilogue.offset() {
                break;
            }
            if tag.allocated {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += tag.size;
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += tag.size;
                stats.largest_free = stats.largest_free.max(tag.size);
            }
            block = block.next(mem);
        }
        stats
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArenaRegion, size_class::Prologue};

    #[test]
    fn test_stats_of_fresh_heap() {
        let heap = Heap::new(ArenaRegion::with_capacity(4096)).unwrap();
        let stats = heap.stats();
        assert_eq!(stats.heap_bytes, Prologue::INITIAL_HEAP + 256);
        assert_eq!(stats.allocated_blocks, 0);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, 256);
        assert_eq!(stats.largest_free, 256);
    }

    #[test]
    fn test_stats_track_allocations() {
        let mut heap = Heap::new(ArenaRegion::with_capacity(4096)).unwrap();
        let a = heap.allocate(40).unwrap();
        let _b = heap.allocate(100).unwrap();
        let stats = heap.stats();
        assert_eq!(stats.allocated_blocks, 2);
        assert_eq!(stats.allocated_bytes, 48 + 112);
        assert_eq!(stats.free_bytes, 256 - 48 - 112);

        heap.release(a);
        let stats = heap.stats();
        assert_eq!(stats.allocated_blocks, 1);
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(stats.largest_free, 96);
        assert_eq!(
            stats.heap_bytes,
            Prologue::INITIAL_HEAP + stats.allocated_bytes + stats.free_bytes
        );
    }
}
