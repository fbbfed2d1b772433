//! Size classes and the heap prologue that anchors their free lists.
//!
//! Free blocks are segregated into [`NUM_CLASSES`] classes by size. Small
//! sizes are split finely and the last class is open-ended, so a first-fit
//! scan for a common small request only walks blocks that are already close
//! to the requested size.
//!
//! The list heads live inside the prologue, an always-allocated block at the
//! bottom of the heap:
//!
//! ```text
//! low
//! ├─ +0    prologue header (112 | 1)
//! ├─ +4    head of class 0   ─┐  class i behaves as a pseudo-block at
//! ├─ +12   head of class 1    │  low + 8*i whose `next` link sits at
//! ├─  ...                     │  low + 8*i + 4
//! ├─ +100  head of class 12  ─┘
//! ├─ +108  prologue footer (112 | 1)
//! ├─ +112  list-end sentinel (0 | 1)
//! └─ +116  first block header (or the epilogue of an empty heap)
//! ```
//!
//! Every list is terminated by the shared sentinel, whose size of zero marks
//! the end of a scan. Because the sentinel sits right before the first
//! block, it also serves as an allocated "previous footer" for that block.

use core::ops::Range;

use dataview::DataView;

use crate::block::{Block, DWORD, Tag, WORD};

/// Number of segregated size classes.
pub const NUM_CLASSES: usize = 13;

/// Exclusive upper bounds of every class but the last.
const CLASS_LIMITS: [usize; NUM_CLASSES - 1] = [
    249, 1025, 2609, 3609, 4609, 5609, 6609, 7609, 8609, 9609, 10609, 11609,
];

/// One segregated size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("{_0}")]
pub struct SizeClass(usize);

impl SizeClass {
    /// Returns the smallest class whose range contains `size`.
    #[must_use]
    pub fn of(size: usize) -> Self {
        let index = CLASS_LIMITS
            .iter()
            .position(|&limit| size < limit)
            .unwrap_or(NUM_CLASSES - 1);
        Self(index)
    }

    /// Iterates over all classes in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..NUM_CLASSES).map(Self)
    }

    /// Iterates over this class and every larger one, in ascending order.
    pub fn and_larger(self) -> impl Iterator<Item = Self> {
        (self.0..NUM_CLASSES).map(Self)
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }

    /// Block sizes that belong to this class.
    ///
    /// The last class is open-ended.
    #[must_use]
    pub fn range(self) -> Range<usize> {
        let start = match self.0 {
            0 => 0,
            i => CLASS_LIMITS[i - 1],
        };
        let end = CLASS_LIMITS.get(self.0).copied().unwrap_or(usize::MAX);
        start..end
    }

    #[must_use]
    pub fn contains(self, size: usize) -> bool {
        self.range().contains(&size)
    }
}

/// Fixed layout at the bottom of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Prologue {
    low: usize,
}

impl Prologue {
    /// Size of the prologue block: header, one slot per class, footer.
    pub(crate) const SIZE: usize = (NUM_CLASSES + 1) * DWORD;

    /// Bytes formatted before the first growth: prologue, sentinel, epilogue.
    pub(crate) const INITIAL_HEAP: usize = Self::SIZE + 2 * WORD;

    pub(crate) const fn new(low: usize) -> Self {
        Self { low }
    }

    pub(crate) const fn low(self) -> usize {
        self.low
    }

    /// The prologue block itself.
    pub(crate) const fn block(self) -> Block {
        Block::at(self.low)
    }

    /// The pseudo-block acting as the list head of `class`.
    ///
    /// Only its `next` link is ever read or written.
    pub(crate) const fn head(self, class: SizeClass) -> Block {
        Block::at(self.low + class.0 * DWORD)
    }

    /// The list-end marker shared by every class.
    pub(crate) const fn sentinel(self) -> Block {
        Block::at(self.low + Self::SIZE)
    }

    /// Header offset of the first real block.
    pub(crate) const fn first_block(self) -> Block {
        Block::at(self.low + Self::SIZE + WORD)
    }

    /// Writes the prologue, empty lists, the sentinel and an epilogue.
    ///
    /// `mem` must cover at least [`INITIAL_HEAP`](Self::INITIAL_HEAP) bytes
    /// from `low`.
    pub(crate) fn format(self, mem: &mut DataView) {
        self.block().set_tags(mem, Tag::allocated(Self::SIZE));
        for class in SizeClass::all() {
            self.head(class).set_next_free(mem, self.sentinel());
        }
        self.sentinel().set_header(mem, Tag::END);
        self.first_block().set_header(mem, Tag::END);
    }
}
